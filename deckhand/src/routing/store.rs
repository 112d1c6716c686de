//! Loading and persisting routing documents on any host

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::DeckhandError;
use crate::exec::quote::{encode_base64, shell_quote};
use crate::exec::{Dispatcher, ExecTarget};
use crate::filesys::file::File;
use crate::routing::types::FileConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Routing documents of the control host and of remote hosts
///
/// Local documents use the filesystem, remote ones go through the dispatcher.
/// Both serialize documents identically.
pub struct DocumentStore {
    settings: Arc<Settings>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl DocumentStore {
    pub fn new(settings: Arc<Settings>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            settings,
            dispatcher,
        }
    }

    /// File holding a document on its host
    pub fn document_file(&self, target: &ExecTarget, name: &str) -> File {
        StorageLayout::for_target(&self.settings, target).routing_file(name)
    }

    /// Load a document
    ///
    /// A missing document loads as empty, and so does a remote one `cat` cannot
    /// read. A local document that cannot be read or parsed is an error, so that
    /// the caller never overwrites it.
    pub async fn load(&self, target: &ExecTarget, name: &str) -> Result<FileConfig, DeckhandError> {
        let raw = match self.read_raw(target, name).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(FileConfig::default()),
            Err(e) if target.is_remote() && e.is_exec() => {
                debug!("Unable to read routing document {} on {}: {}", name, target, e);
                return Ok(FileConfig::default());
            }
            Err(e) => return Err(e),
        };

        parse(&raw).map_err(|e| {
            warn!("Routing document {} on {} is not valid: {}", name, target, e);
            e
        })
    }

    /// Raw contents of a document, `None` when it does not exist or is empty
    pub async fn read_raw(
        &self,
        target: &ExecTarget,
        name: &str,
    ) -> Result<Option<String>, DeckhandError> {
        let file = self.document_file(target, name);
        let raw = match target {
            ExecTarget::Local => {
                if !file.exists().await {
                    return Ok(None);
                }
                file.read_string().await?
            }
            ExecTarget::Remote(_) => {
                let command = format!("cat {}", shell_quote(&file.path().to_string_lossy()));
                self.dispatcher.execute(target, &command, None).await?.stdout
            }
        };

        if raw.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(raw))
        }
    }

    /// Replace a document atomically
    pub async fn persist(
        &self,
        target: &ExecTarget,
        name: &str,
        config: &FileConfig,
    ) -> Result<(), DeckhandError> {
        let yaml = serde_yaml::to_string(config)?;
        self.persist_raw(target, name, &yaml).await
    }

    /// Replace a document atomically with text as given
    pub async fn persist_raw(
        &self,
        target: &ExecTarget,
        name: &str,
        yaml: &str,
    ) -> Result<(), DeckhandError> {
        let file = self.document_file(target, name);
        debug!("Persisting routing document {} on {}", name, target);

        match target {
            ExecTarget::Local => file.write_atomic(yaml.as_bytes()).await,
            ExecTarget::Remote(_) => {
                let path = file.path().to_string_lossy().to_string();
                let temp = file.temp_path().to_string_lossy().to_string();
                let dir = file
                    .path()
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| ".".to_string());
                let command = format!(
                    "mkdir -p {dir} && echo {payload} | base64 -d > {temp} && mv {temp} {path}",
                    dir = shell_quote(&dir),
                    payload = shell_quote(&encode_base64(yaml)),
                    temp = shell_quote(&temp),
                    path = shell_quote(&path),
                );
                self.dispatcher.execute(target, &command, None).await?;
                Ok(())
            }
        }
    }

    /// Delete a document
    pub async fn remove(&self, target: &ExecTarget, name: &str) -> Result<(), DeckhandError> {
        let file = self.document_file(target, name);
        debug!("Removing routing document {} on {}", name, target);

        match target {
            ExecTarget::Local => file.delete().await,
            ExecTarget::Remote(_) => {
                let command = format!("rm -f {}", shell_quote(&file.path().to_string_lossy()));
                self.dispatcher.execute(target, &command, None).await?;
                Ok(())
            }
        }
    }
}

/// Parse document text; an empty document is an empty configuration
pub fn parse(raw: &str) -> Result<FileConfig, DeckhandError> {
    Ok(serde_yaml::from_str::<Option<FileConfig>>(raw)?.unwrap_or_default())
}

//! Traefik routing reconciliation
//!
//! Each owner (application, compose stack, preview or proxy) has one dynamic
//! document in Traefik's watched directory; middlewares shared across owners live
//! in the `middlewares` document. The [`Reconciler`] is the only writer of both.

pub mod domain;
pub mod lock;
pub mod middleware;
pub mod names;
pub mod proxy;
pub mod store;
pub mod types;

use std::sync::Arc;

use tracing::info;

use crate::errors::DeckhandError;
use crate::exec::{Dispatcher, ExecTarget};
use crate::storage::settings::Settings;

pub use domain::{CertificateMode, DomainBinding, DomainType, RoutingOwner};
pub use lock::DocumentLocks;
pub use middleware::{RedirectRule, SecurityRule};
pub use proxy::{ProxyBinding, ProxyTarget, StaticResolver, TargetResolver};
pub use store::DocumentStore;
pub use types::FileConfig;

/// Writes routing documents on the control host and on remote hosts
pub struct Reconciler {
    pub(crate) store: DocumentStore,
    pub(crate) locks: DocumentLocks,
    pub(crate) resolver: Arc<dyn TargetResolver>,
}

impl Reconciler {
    pub fn new(
        settings: Arc<Settings>,
        dispatcher: Arc<dyn Dispatcher>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            store: DocumentStore::new(settings, dispatcher),
            locks: DocumentLocks::new(),
            resolver,
        }
    }

    /// Raw text of a document, for diagnostics
    pub async fn read_document(
        &self,
        target: &ExecTarget,
        name: &str,
    ) -> Result<Option<String>, DeckhandError> {
        let _lock = self.locks.lock(target, name).await;
        self.store.read_raw(target, name).await
    }

    /// Parsed document, empty when missing
    pub async fn load_document(
        &self,
        target: &ExecTarget,
        name: &str,
    ) -> Result<FileConfig, DeckhandError> {
        let _lock = self.locks.lock(target, name).await;
        self.store.load(target, name).await
    }

    /// Replace a whole document with hand-edited text
    ///
    /// The text is stored as given once it parses as a dynamic configuration.
    pub async fn write_document(
        &self,
        target: &ExecTarget,
        name: &str,
        raw: &str,
    ) -> Result<(), DeckhandError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(DeckhandError::ValidationError(format!(
                "invalid routing document name {:?}",
                name
            )));
        }
        store::parse(raw).map_err(|e| {
            DeckhandError::ValidationError(format!("document {} is not valid: {}", name, e))
        })?;

        let _lock = self.locks.lock(target, name).await;
        self.store.persist_raw(target, name, raw).await?;
        info!("Wrote routing document {} on {}", name, target);
        Ok(())
    }
}

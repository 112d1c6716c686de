//! Storage layout configuration

use std::path::PathBuf;

use crate::exec::ExecTarget;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::settings::Settings;

/// File name of the shared middleware document
pub const MIDDLEWARES_DOCUMENT: &str = "middlewares";

/// Storage layout rooted at one base directory
///
/// The same layout is used on the control host and on remote hosts; only the base
/// directory differs.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Pick the layout matching where a command or file lives
    pub fn for_target(settings: &Settings, target: &ExecTarget) -> Self {
        match target {
            ExecTarget::Local => Self::new(&settings.base_dir),
            ExecTarget::Remote(_) => Self::new(&settings.remote_base_dir),
        }
    }

    /// Settings file of the control host
    pub fn settings_file(&self) -> File {
        Dir::new(&self.base_dir).file("deckhand.json")
    }

    /// Deployment records of the control host
    pub fn deployments_file(&self) -> File {
        Dir::new(&self.base_dir).file("deployments.json")
    }

    /// Root directory of deployment logs
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Log directory of one owner
    pub fn owner_logs_dir(&self, app_name: &str) -> Dir {
        self.logs_dir().subdir(app_name)
    }

    /// Traefik directory
    pub fn traefik_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("traefik"))
    }

    /// Directory watched by Traefik's file provider
    pub fn dynamic_traefik_dir(&self) -> Dir {
        self.traefik_dir().subdir("dynamic")
    }

    /// Routing document of one owner
    pub fn routing_file(&self, owner_name: &str) -> File {
        self.dynamic_traefik_dir()
            .file(&format!("{}.yml", owner_name))
    }

    /// Shared middleware document
    pub fn middlewares_file(&self) -> File {
        self.routing_file(MIDDLEWARES_DOCUMENT)
    }

    /// Root of application working trees
    pub fn applications_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("applications"))
    }

    /// Root of compose working trees
    pub fn compose_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("compose"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::DeckhandError> {
        self.logs_dir().create().await?;
        self.dynamic_traefik_dir().create().await?;
        self.applications_dir().create().await?;
        self.compose_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/dokploy")
    }
}

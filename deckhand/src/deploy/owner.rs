//! Deployable owners

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::deploy::build::BuildType;
use crate::deploy::source::SourceDescriptor;
use crate::exec::ExecTarget;
use crate::models::deployment::{OwnerRef, StatusKey};
use crate::orchestrator::RuntimeSpec;
use crate::storage::layout::StorageLayout;

/// Everything the lifecycle manager needs to deploy an owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployOwner {
    pub owner: OwnerRef,

    /// Display name
    pub name: String,

    /// Project the owner belongs to, for notifications
    #[serde(default)]
    pub project_name: String,

    /// Stable internal name; names log directories, code paths and services
    pub app_name: String,

    /// Remote host running the owner; local when absent
    #[serde(default)]
    pub server_id: Option<String>,

    pub source: SourceDescriptor,

    pub build: BuildType,

    /// Build environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Service to converge after a successful build
    #[serde(default)]
    pub runtime: Option<RuntimeSpec>,
}

impl DeployOwner {
    pub fn target(&self) -> ExecTarget {
        ExecTarget::from_server_id(self.server_id.as_deref())
    }

    pub fn status_key(&self) -> StatusKey {
        StatusKey::Owner(self.owner.clone())
    }

    /// Working tree the source is fetched into
    pub fn code_path(&self, layout: &StorageLayout) -> PathBuf {
        let root = match &self.owner {
            OwnerRef::Compose(_) => layout.compose_dir(),
            OwnerRef::Application(_) | OwnerRef::Preview(_) => layout.applications_dir(),
            OwnerRef::Server(_) => return layout.base_dir.clone(),
        };
        root.subdir(&self.app_name).path().join("code")
    }
}

/// A database service; deployed without records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOwner {
    pub id: String,

    pub app_name: String,

    #[serde(default)]
    pub server_id: Option<String>,

    pub runtime: RuntimeSpec,
}

impl DatabaseOwner {
    pub fn target(&self) -> ExecTarget {
        ExecTarget::from_server_id(self.server_id.as_deref())
    }

    pub fn status_key(&self) -> StatusKey {
        StatusKey::Database(self.id.clone())
    }
}

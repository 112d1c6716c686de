//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner of a deployment record
///
/// A record belongs to exactly one owner; the enum makes any other shape
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum OwnerRef {
    Application(String),
    Compose(String),
    Server(String),
    Preview(String),
}

impl OwnerRef {
    /// Id of the owning entity
    pub fn id(&self) -> &str {
        match self {
            OwnerRef::Application(id)
            | OwnerRef::Compose(id)
            | OwnerRef::Server(id)
            | OwnerRef::Preview(id) => id,
        }
    }

    /// Kind name, as used in build links and notifications
    pub fn kind(&self) -> &'static str {
        match self {
            OwnerRef::Application(_) => "application",
            OwnerRef::Compose(_) => "compose",
            OwnerRef::Server(_) => "server",
            OwnerRef::Preview(_) => "preview",
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// Status of a single deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Done,
    Error,
    Idle,
}

impl DeploymentStatus {
    /// Whether the deployment reached an end state
    pub fn is_finished(&self) -> bool {
        matches!(self, DeploymentStatus::Done | DeploymentStatus::Error)
    }
}

/// Aggregate status of a deployable owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

/// Anything carrying an [`OwnerStatus`]
///
/// Databases have a status but never own deployment records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusKey {
    Owner(OwnerRef),
    Database(String),
}

impl From<OwnerRef> for StatusKey {
    fn from(owner: OwnerRef) -> Self {
        StatusKey::Owner(owner)
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKey::Owner(owner) => owner.fmt(f),
            StatusKey::Database(id) => write!(f, "database {}", id),
        }
    }
}

/// A tracked unit of deploy work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique deployment ID
    pub id: String,

    /// Owning entity
    pub owner: OwnerRef,

    pub title: String,

    pub description: String,

    pub status: DeploymentStatus,

    /// Append-only log of the run; empty for records of failed creations
    pub log_path: String,

    /// Message of a failed creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Values for a record about to be inserted
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub owner: OwnerRef,
    pub title: String,
    pub description: String,
    pub status: DeploymentStatus,
    pub log_path: String,
    pub error_message: Option<String>,
}

//! Container orchestrator seam
//!
//! Deployments hand a [`RuntimeSpec`] to a [`ServiceSpecBuilder`], which makes the
//! orchestrator run it. The shipped builder drives Docker Swarm through the
//! dispatcher.

pub mod swarm;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;
use crate::exec::ExecTarget;

pub use swarm::SwarmServiceBuilder;

/// Desired shape of a running service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub service_name: String,

    pub image: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub mounts: Vec<Mount>,

    #[serde(default)]
    pub ports: Vec<PortMapping>,

    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub mode: ScalingMode,

    /// Networks besides the shared overlay network
    #[serde(default)]
    pub networks: Vec<String>,

    /// Command overriding the image's entrypoint arguments
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub published: u16,
    pub target: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPUs, fractional
    #[serde(default)]
    pub cpu_limit: Option<f64>,

    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ScalingMode {
    Replicated { replicas: u64 },
    Global,
}

impl Default for ScalingMode {
    fn default() -> Self {
        ScalingMode::Replicated { replicas: 1 }
    }
}

/// Makes the orchestrator run a service as specified
#[async_trait]
pub trait ServiceSpecBuilder: Send + Sync {
    /// Create the service, or update it if it already exists
    async fn converge(&self, target: &ExecTarget, spec: &RuntimeSpec) -> Result<(), DeckhandError>;

    /// Set the replica count of an existing service
    async fn scale(
        &self,
        target: &ExecTarget,
        service_name: &str,
        replicas: u64,
    ) -> Result<(), DeckhandError>;
}

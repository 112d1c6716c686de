//! Command execution on the control host or on remote hosts
//!
//! Everything that touches a host other than through the local filesystem goes
//! through a [`Dispatcher`]: deploy scripts, log markers, routing documents on
//! remote servers and `docker service` calls.

pub mod quote;
pub mod shell;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

pub use shell::ShellDispatcher;

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "server_id")]
pub enum ExecTarget {
    /// The control host itself
    Local,
    /// A remote host, by server id
    Remote(String),
}

impl ExecTarget {
    /// Target for an optional server id
    pub fn from_server_id(server_id: Option<&str>) -> Self {
        match server_id {
            Some(id) => ExecTarget::Remote(id.to_string()),
            None => ExecTarget::Local,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ExecTarget::Remote(_))
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecTarget::Local => write!(f, "local"),
            ExecTarget::Remote(id) => write!(f, "server {}", id),
        }
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Callback receiving output lines as they are produced
pub type ChunkSink = dyn Fn(&str) + Send + Sync;

/// Runs shell commands on a target
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Run `command` on `target` and wait for it to finish
    ///
    /// A non-zero exit or a failed session is reported as
    /// [`DeckhandError::Exec`]; any other variant means the dispatcher itself
    /// could not be used (for example an unknown server id).
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
        on_chunk: Option<&ChunkSink>,
    ) -> Result<ExecOutput, DeckhandError>;
}

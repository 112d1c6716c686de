//! Build result notifications

pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::DeckhandError;

pub use webhook::WebhookNotifier;

/// How a build ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum BuildOutcome {
    Success,
    Failure { error_message: String },
}

/// Payload sent when a build ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNotification {
    pub project_name: String,
    pub application_name: String,
    pub application_type: String,
    /// Dashboard page listing the owner's deployments
    pub build_link: String,
    #[serde(flatten)]
    pub outcome: BuildOutcome,
}

/// Sink for build notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_build_result(&self, notification: &BuildNotification) -> Result<(), DeckhandError>;
}

/// Notifier writing to the process log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_build_result(&self, notification: &BuildNotification) -> Result<(), DeckhandError> {
        match &notification.outcome {
            BuildOutcome::Success => info!(
                "Build of {} succeeded: {}",
                notification.application_name, notification.build_link
            ),
            BuildOutcome::Failure { error_message } => error!(
                "Build of {} failed: {} ({})",
                notification.application_name, error_message, notification.build_link
            ),
        }
        Ok(())
    }
}

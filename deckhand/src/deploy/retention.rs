//! Deployment history retention

use tracing::{debug, info};

use crate::errors::DeckhandError;
use crate::exec::quote::shell_quote;
use crate::exec::{Dispatcher, ExecTarget};
use crate::filesys::file::File;
use crate::models::deployment::{DeploymentRecord, OwnerRef};
use crate::storage::repository::DeploymentRepository;
use crate::storage::settings::RetentionSettings;

/// Number of records an owner keeps
pub fn window_for(owner: &OwnerRef, settings: &RetentionSettings) -> usize {
    match owner {
        OwnerRef::Server(_) => settings.server_window,
        _ => settings.default_window,
    }
}

/// Trim `records` (newest first) so a new insert leaves exactly `window` records
///
/// Removed records lose their log files too: remote targets get one batched
/// `rm -f`, local files are unlinked one by one. Returns the records kept.
pub async fn sweep(
    dispatcher: &dyn Dispatcher,
    repository: &dyn DeploymentRepository,
    target: &ExecTarget,
    window: usize,
    mut records: Vec<DeploymentRecord>,
) -> Result<Vec<DeploymentRecord>, DeckhandError> {
    let keep = window.saturating_sub(1);
    if records.len() <= keep {
        return Ok(records);
    }

    let excess = records.split_off(keep);
    info!("Sweeping {} old deployments on {}, keeping {}", excess.len(), target, records.len());

    match target {
        ExecTarget::Remote(_) => {
            let mut paths = Vec::new();
            for record in &excess {
                repository.remove(&record.id).await?;
                if !record.log_path.is_empty() {
                    paths.push(shell_quote(&record.log_path));
                }
            }
            if !paths.is_empty() {
                let command = format!("rm -f {}", paths.join(" "));
                dispatcher.execute(target, &command, None).await?;
            }
        }
        ExecTarget::Local => {
            for record in &excess {
                if !record.log_path.is_empty() {
                    debug!("Removing log file {}", record.log_path);
                    File::new(&record.log_path).delete().await?;
                }
                repository.remove(&record.id).await?;
            }
        }
    }

    Ok(records)
}

//! Deployment executor
//!
//! Drives one deployment from record creation to completion: retention sweep,
//! log file, composite command, service convergence, status bookkeeping and
//! notifications.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::{debug, error, info, warn};

use crate::deploy::build::BuildContext;
use crate::deploy::command::{append_line, error_block, DeployScript, INIT_MARKER};
use crate::deploy::fsm::{OwnerEvent, OwnerFsm};
use crate::deploy::owner::{DatabaseOwner, DeployOwner};
use crate::deploy::retention;
use crate::errors::DeckhandError;
use crate::exec::quote::shell_quote;
use crate::exec::{Dispatcher, ExecTarget};
use crate::filesys::file::File;
use crate::models::deployment::{
    DeploymentRecord, DeploymentStatus, NewDeployment, OwnerStatus, StatusKey,
};
use crate::notify::{BuildNotification, BuildOutcome, Notifier};
use crate::orchestrator::ServiceSpecBuilder;
use crate::storage::layout::StorageLayout;
use crate::storage::repository::DeploymentRepository;
use crate::storage::settings::Settings;

/// Title of deployments triggered by hand
pub const DEFAULT_TITLE: &str = "Manual deployment";

/// Title of rebuilds
pub const REBUILD_TITLE: &str = "Rebuild deployment";

/// Latest commit of a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

impl CommitInfo {
    /// Parse the output of `git log -1 --format=%H%n%s`
    pub fn parse(output: &str) -> Option<Self> {
        let mut lines = output.lines();
        let hash = lines.next()?.trim();
        if hash.is_empty() {
            return None;
        }
        let message = lines.next().unwrap_or_default().trim();
        Some(Self {
            hash: hash.to_string(),
            message: message.to_string(),
        })
    }
}

/// Deployment executor
pub struct DeploymentExecutor {
    settings: Arc<Settings>,
    dispatcher: Arc<dyn Dispatcher>,
    repository: Arc<dyn DeploymentRepository>,
    services: Arc<dyn ServiceSpecBuilder>,
    notifier: Arc<dyn Notifier>,
}

impl DeploymentExecutor {
    /// Create a new deployment executor
    pub fn new(
        settings: Arc<Settings>,
        dispatcher: Arc<dyn Dispatcher>,
        repository: Arc<dyn DeploymentRepository>,
        services: Arc<dyn ServiceSpecBuilder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            dispatcher,
            repository,
            services,
            notifier,
        }
    }

    /// Create a tracked deployment with an initialized log file
    ///
    /// On failure the owner is marked as errored, an error record is kept for the
    /// history and [`DeckhandError::CreateDeployment`] is returned.
    pub async fn create(
        &self,
        owner: &DeployOwner,
        title: &str,
        description: &str,
    ) -> Result<DeploymentRecord, DeckhandError> {
        match self.try_create(owner, title, description).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!("Failed to create deployment for {}: {}", owner.owner, e);

                if let Err(status_err) = self
                    .transition(&owner.status_key(), OwnerEvent::Fail(e.to_string()))
                    .await
                {
                    warn!("Failed to mark {} as errored: {}", owner.owner, status_err);
                }

                let failed = NewDeployment {
                    owner: owner.owner.clone(),
                    title: title.to_string(),
                    description: description.to_string(),
                    status: DeploymentStatus::Error,
                    log_path: String::new(),
                    error_message: Some(format!("An error have occured: {}", e)),
                };
                if let Err(insert_err) = self.repository.insert(failed).await {
                    warn!("Failed to record failed deployment: {}", insert_err);
                }

                Err(DeckhandError::CreateDeployment(e.to_string()))
            }
        }
    }

    async fn try_create(
        &self,
        owner: &DeployOwner,
        title: &str,
        description: &str,
    ) -> Result<DeploymentRecord, DeckhandError> {
        let target = owner.target();
        let layout = StorageLayout::for_target(&self.settings, &target);

        let existing = self.repository.list_by_owner(&owner.owner).await?;
        let window = retention::window_for(&owner.owner, &self.settings.retention);
        let kept = retention::sweep(
            self.dispatcher.as_ref(),
            self.repository.as_ref(),
            &target,
            window,
            existing,
        )
        .await?;

        let log_dir = layout.owner_logs_dir(&owner.app_name);
        let log_path = unique_log_path(log_dir.path(), &owner.app_name, Utc::now(), &kept);

        match &target {
            ExecTarget::Local => {
                log_dir.create().await?;
                File::new(&log_path)
                    .append_string(&format!("{}\n", INIT_MARKER))
                    .await?;
            }
            ExecTarget::Remote(_) => {
                let command = format!(
                    "mkdir -p {} && {}",
                    shell_quote(&log_dir.path().to_string_lossy()),
                    append_line(&log_path, INIT_MARKER)
                );
                self.dispatcher.execute(&target, &command, None).await?;
            }
        }

        let record = self
            .repository
            .insert(NewDeployment {
                owner: owner.owner.clone(),
                title: title.to_string(),
                description: description.to_string(),
                status: DeploymentStatus::Running,
                log_path,
                error_message: None,
            })
            .await?;

        info!("Created deployment {} for {} ({})", record.id, owner.owner, record.log_path);
        Ok(record)
    }

    /// Fetch, build and start an owner
    pub async fn deploy(
        &self,
        owner: &DeployOwner,
        title: &str,
        description: &str,
    ) -> Result<(), DeckhandError> {
        info!("Deploying {}", owner.owner);
        self.start(owner, title, description, true).await
    }

    /// Build and start an owner from its existing working tree
    pub async fn rebuild(&self, owner: &DeployOwner, description: &str) -> Result<(), DeckhandError> {
        info!("Rebuilding {}", owner.owner);
        self.start(owner, REBUILD_TITLE, description, false).await
    }

    async fn start(
        &self,
        owner: &DeployOwner,
        title: &str,
        description: &str,
        fetch: bool,
    ) -> Result<(), DeckhandError> {
        self.transition(&owner.status_key(), OwnerEvent::Deploy).await?;
        let record = self.create(owner, title, description).await?;

        let result = self.execute(owner, &record, fetch).await;
        self.attach_commit_info(owner, &record).await;
        result
    }

    async fn execute(
        &self,
        owner: &DeployOwner,
        record: &DeploymentRecord,
        fetch: bool,
    ) -> Result<(), DeckhandError> {
        let target = owner.target();
        match self.run_steps(owner, record, fetch, &target).await {
            Ok(()) => {
                info!("Deployment {} of {} succeeded", record.id, owner.owner);
                self.notify(owner, BuildOutcome::Success).await;
                Ok(())
            }
            Err(e) => {
                error!("Deployment {} of {} failed: {}", record.id, owner.owner, e);
                self.fail(owner, record, &target, &e).await;
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        owner: &DeployOwner,
        record: &DeploymentRecord,
        fetch: bool,
        target: &ExecTarget,
    ) -> Result<(), DeckhandError> {
        let layout = StorageLayout::for_target(&self.settings, target);
        let code_path = owner.code_path(&layout).to_string_lossy().to_string();
        let provider = owner.source.provider();

        let mut script = DeployScript::new(record.log_path.as_str());
        if fetch {
            script = script.maybe_step(provider.clone_step(&code_path));
        }
        if provider.needs_build() {
            script = script.step(owner.build.build_step(&BuildContext {
                app_name: &owner.app_name,
                code_path: &code_path,
                env: &owner.env,
            }));
        }

        if !script.is_empty() {
            self.dispatcher
                .execute(target, &script.render(), None)
                .await?;
        }

        if let Some(runtime) = &owner.runtime {
            self.services.converge(target, runtime).await?;
        }

        self.repository
            .update_status(&record.id, DeploymentStatus::Done)
            .await?;
        self.transition(&owner.status_key(), OwnerEvent::Succeed)
            .await?;
        Ok(())
    }

    /// Close the log of a failed run and record the failure
    ///
    /// Bookkeeping errors are logged; the run's own error is what callers see.
    async fn fail(
        &self,
        owner: &DeployOwner,
        record: &DeploymentRecord,
        target: &ExecTarget,
        err: &DeckhandError,
    ) {
        let internal = if err.is_exec() {
            None
        } else {
            Some(err.to_string())
        };
        let block = error_block(&record.log_path, internal.as_deref());
        if let Err(e) = self.dispatcher.execute(target, &block, None).await {
            warn!("Failed to close log {}: {}", record.log_path, e);
        }

        if let Err(e) = self
            .repository
            .update_status(&record.id, DeploymentStatus::Error)
            .await
        {
            warn!("Failed to mark deployment {} as errored: {}", record.id, e);
        }
        if let Err(e) = self
            .transition(&owner.status_key(), OwnerEvent::Fail(err.to_string()))
            .await
        {
            warn!("Failed to mark {} as errored: {}", owner.owner, e);
        }

        self.notify(
            owner,
            BuildOutcome::Failure {
                error_message: err.to_string(),
            },
        )
        .await;
    }

    /// Replace title and description with the checked out commit
    async fn attach_commit_info(&self, owner: &DeployOwner, record: &DeploymentRecord) {
        if !owner.source.provider().is_git() {
            return;
        }

        let target = owner.target();
        let layout = StorageLayout::for_target(&self.settings, &target);
        let command = format!(
            "git -C {} log -1 --format=%H%n%s",
            shell_quote(&owner.code_path(&layout).to_string_lossy())
        );

        let output = match self.dispatcher.execute(&target, &command, None).await {
            Ok(output) => output,
            Err(e) => {
                debug!("No commit info for {}: {}", owner.owner, e);
                return;
            }
        };

        let Some(commit) = CommitInfo::parse(&output.stdout) else {
            debug!("No commit info for {}", owner.owner);
            return;
        };
        if let Err(e) = self
            .repository
            .update_details(&record.id, &commit.message, &format!("Commit: {}", commit.hash))
            .await
        {
            debug!("Failed to attach commit info to {}: {}", record.id, e);
        }
    }

    /// Pull and converge a database service
    pub async fn deploy_database(&self, database: &DatabaseOwner) -> Result<(), DeckhandError> {
        info!("Deploying database {}", database.id);
        let key = database.status_key();
        self.transition(&key, OwnerEvent::Deploy).await?;

        let target = database.target();
        let result = async {
            let pull = format!("docker pull {}", shell_quote(&database.runtime.image));
            self.dispatcher.execute(&target, &pull, None).await?;
            self.services.converge(&target, &database.runtime).await
        }
        .await;

        match result {
            Ok(()) => {
                self.transition(&key, OwnerEvent::Succeed).await?;
                Ok(())
            }
            Err(e) => {
                error!("Database {} failed to deploy: {}", database.id, e);
                if let Err(status_err) = self.transition(&key, OwnerEvent::Fail(e.to_string())).await {
                    warn!("Failed to mark database {} as errored: {}", database.id, status_err);
                }
                Err(e)
            }
        }
    }

    /// Stop an owner's workload
    ///
    /// Refused while a deployment runs; builds cannot be interrupted.
    pub async fn stop(&self, owner: &DeployOwner) -> Result<(), DeckhandError> {
        let key = owner.status_key();
        let current = self.repository.owner_status(&key).await?;
        let next = OwnerFsm::from_state(current).process(OwnerEvent::Stop)?;
        info!("Stopping {}", owner.owner);

        let target = owner.target();
        if let Some(runtime) = &owner.runtime {
            self.services.scale(&target, &runtime.service_name, 0).await?;
        } else if let Some(command) = owner.build.stop_command(&owner.app_name) {
            self.dispatcher.execute(&target, &command, None).await?;
        }

        self.repository.set_owner_status(&key, next).await?;

        let latest = self.repository.list_by_owner(&owner.owner).await?.into_iter().next();
        if let Some(latest) = latest {
            if latest.status != DeploymentStatus::Running {
                self.repository
                    .update_status(&latest.id, DeploymentStatus::Idle)
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete all deployments of an owner with their logs
    pub async fn remove_deployments(&self, owner: &DeployOwner) -> Result<(), DeckhandError> {
        let target = owner.target();
        let layout = StorageLayout::for_target(&self.settings, &target);
        let log_dir = layout.owner_logs_dir(&owner.app_name);

        match &target {
            ExecTarget::Local => log_dir.delete().await?,
            ExecTarget::Remote(_) => {
                let command = format!("rm -rf {}", shell_quote(&log_dir.path().to_string_lossy()));
                self.dispatcher.execute(&target, &command, None).await?;
            }
        }

        let removed = self.repository.remove_by_owner(&owner.owner).await?;
        info!("Removed {} deployments of {}", removed, owner.owner);
        Ok(())
    }

    /// Aggregate status of an owner
    pub async fn status(&self, key: &StatusKey) -> Result<OwnerStatus, DeckhandError> {
        self.repository.owner_status(key).await
    }

    /// Dashboard page listing an owner's deployments
    pub fn build_link(&self, owner: &DeployOwner) -> String {
        format!(
            "{}/dashboard/{}/{}?tab=deployments",
            self.settings.public_url.trim_end_matches('/'),
            owner.owner.kind(),
            owner.owner.id()
        )
    }

    async fn transition(&self, key: &StatusKey, event: OwnerEvent) -> Result<OwnerStatus, DeckhandError> {
        let current = self.repository.owner_status(key).await?;
        let next = OwnerFsm::from_state(current).process(event)?;
        self.repository.set_owner_status(key, next).await?;
        debug!("{}: {:?} -> {:?}", key, current, next);
        Ok(next)
    }

    async fn notify(&self, owner: &DeployOwner, outcome: BuildOutcome) {
        let notification = BuildNotification {
            project_name: owner.project_name.clone(),
            application_name: owner.name.clone(),
            application_type: owner.owner.kind().to_string(),
            build_link: self.build_link(owner),
            outcome,
        };
        if let Err(e) = self.notifier.notify_build_result(&notification).await {
            warn!("Failed to send build notification for {}: {}", owner.owner, e);
        }
    }
}

/// Log path for a new deployment, never equal to one of `existing`
fn unique_log_path(
    dir: &Path,
    app_name: &str,
    mut at: DateTime<Utc>,
    existing: &[DeploymentRecord],
) -> String {
    loop {
        let name = format!(
            "{}-{}.log",
            app_name,
            at.to_rfc3339_opts(SecondsFormat::Micros, true)
        );
        let path = dir.join(name).to_string_lossy().to_string();
        if !existing.iter().any(|r| r.log_path == path) {
            return path;
        }
        at += Duration::microseconds(1);
    }
}

//! Deployment lifecycle tests

use std::sync::Arc;

use tempfile::TempDir;

use deckhand::deploy::command::{ERROR_MARKER, INIT_MARKER};
use deckhand::deploy::executor::{DEFAULT_TITLE, REBUILD_TITLE};
use deckhand::deploy::source::{CustomGitRepo, SourceDescriptor};
use deckhand::deploy::DatabaseOwner;
use deckhand::errors::DeckhandError;
use deckhand::exec::ShellDispatcher;
use deckhand::models::deployment::{DeploymentStatus, OwnerStatus, StatusKey};
use deckhand::notify::BuildOutcome;
use deckhand::storage::repository::DeploymentRepository;

use crate::common::{runtime, script_owner, settings, FakeDispatcher, FakeServices, Harness};

fn shell() -> Arc<ShellDispatcher> {
    Arc::new(ShellDispatcher::new(Default::default()))
}

fn last_line(log: &str) -> &str {
    log.trim_end().lines().last().unwrap_or_default()
}

#[tokio::test]
async fn test_successful_run() {
    let root = TempDir::new().unwrap();
    let harness = Harness::new(settings(root.path()), shell());
    let owner = script_owner("blog", "echo building the blog");

    harness
        .executor
        .deploy(&owner, DEFAULT_TITLE, "")
        .await
        .unwrap();

    let records = harness.repository.list_by_owner(&owner.owner).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, DeploymentStatus::Done);
    assert!(record.finished_at.is_some());
    assert_eq!(record.title, DEFAULT_TITLE);
    assert!(record
        .log_path
        .starts_with(&root.path().join("local/logs/blog/blog-").to_string_lossy().to_string()));
    assert!(record.log_path.ends_with("Z.log"));

    let log = std::fs::read_to_string(&record.log_path).unwrap();
    assert!(log.starts_with(INIT_MARKER));
    assert!(log.contains("building the blog"));
    assert!(!log.contains(ERROR_MARKER));

    assert_eq!(
        harness.executor.status(&owner.status_key()).await.unwrap(),
        OwnerStatus::Done
    );
    assert_eq!(*harness.services.converged.lock().unwrap(), vec!["blog"]);

    let sent = harness.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].outcome, BuildOutcome::Success);
    assert_eq!(sent[0].application_name, "Blog");
    assert_eq!(sent[0].application_type, "application");
    assert_eq!(
        sent[0].build_link,
        "https://deck.example.com/dashboard/application/app-1?tab=deployments"
    );
}

#[tokio::test]
async fn test_failed_command_closes_log() {
    let root = TempDir::new().unwrap();
    let harness = Harness::new(settings(root.path()), shell());
    let owner = script_owner("blog", "echo half way\nexit 3");

    let result = harness.executor.deploy(&owner, DEFAULT_TITLE, "").await;
    assert!(matches!(result, Err(DeckhandError::Exec { code: Some(3), .. })));

    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.status, DeploymentStatus::Error);
    let log = std::fs::read_to_string(&record.log_path).unwrap();
    assert!(log.contains("half way"));
    assert!(!log.contains("EXTRA LOGS"));
    assert_eq!(last_line(&log), ERROR_MARKER);

    assert_eq!(
        harness.executor.status(&owner.status_key()).await.unwrap(),
        OwnerStatus::Error
    );
    assert!(harness.services.converged.lock().unwrap().is_empty());

    let sent = harness.notifier.sent.lock().unwrap();
    assert!(matches!(sent[0].outcome, BuildOutcome::Failure { .. }));
}

#[tokio::test]
async fn test_internal_error_is_written_verbatim() {
    let root = TempDir::new().unwrap();
    let message = "service 'blog' rejected: \"$HOME\" `id`";
    let harness = Harness::with_services(
        settings(root.path()),
        shell(),
        FakeServices::failing(message),
    );
    let owner = script_owner("blog", "echo built");

    let result = harness.executor.deploy(&owner, DEFAULT_TITLE, "").await;
    assert!(matches!(result, Err(DeckhandError::DeployError(_))));

    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.status, DeploymentStatus::Error);
    let log = std::fs::read_to_string(&record.log_path).unwrap();
    assert!(log.contains("EXTRA LOGS"));
    assert!(log.contains(message));
    assert_eq!(last_line(&log), ERROR_MARKER);
    assert_eq!(
        harness.executor.status(&owner.status_key()).await.unwrap(),
        OwnerStatus::Error
    );
}

#[tokio::test]
async fn test_creation_failure_leaves_error_record() {
    let root = TempDir::new().unwrap();
    let blocker = root.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let mut settings = settings(root.path());
    settings.base_dir = blocker;

    let harness = Harness::new(settings, shell());
    let owner = script_owner("blog", "echo never");

    let result = harness.executor.deploy(&owner, DEFAULT_TITLE, "first").await;
    assert!(matches!(result, Err(DeckhandError::CreateDeployment(_))));

    let records = harness.repository.list_by_owner(&owner.owner).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeploymentStatus::Error);
    assert!(records[0].log_path.is_empty());
    assert!(records[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("An error have occured"));
    assert_eq!(
        harness.executor.status(&owner.status_key()).await.unwrap(),
        OwnerStatus::Error
    );
}

#[tokio::test]
async fn test_commit_info_replaces_title() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(FakeDispatcher::new().with_output("git -C", "3f2a9c1\nAdd pricing page\n"));
    let harness = Harness::new(settings(root.path()), dispatcher.clone());
    let mut owner = script_owner("blog", "echo build");
    owner.source = SourceDescriptor::Git(CustomGitRepo {
        url: "https://git.example.com/site/blog.git".to_string(),
        branch: "main".to_string(),
        ssh_key: None,
        submodules: false,
    });

    harness
        .executor
        .deploy(&owner, DEFAULT_TITLE, "")
        .await
        .unwrap();

    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.title, "Add pricing page");
    assert_eq!(record.description, "Commit: 3f2a9c1");

    let commands = dispatcher.commands();
    assert!(commands[0].contains("git clone --branch main --depth 1"));
    assert!(commands.last().unwrap().starts_with("git -C"));
}

#[tokio::test]
async fn test_commit_info_failure_is_ignored() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(FakeDispatcher::new().failing_on("git -C"));
    let harness = Harness::new(settings(root.path()), dispatcher);
    let mut owner = script_owner("blog", "echo build");
    owner.source = SourceDescriptor::Git(CustomGitRepo {
        url: "git@git.example.com:site/blog.git".to_string(),
        branch: "main".to_string(),
        ssh_key: Some("-----BEGIN KEY-----".to_string()),
        submodules: true,
    });

    harness
        .executor
        .deploy(&owner, DEFAULT_TITLE, "by hand")
        .await
        .unwrap();

    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.status, DeploymentStatus::Done);
    assert_eq!(record.title, DEFAULT_TITLE);
    assert_eq!(record.description, "by hand");
}

#[tokio::test]
async fn test_rebuild_skips_clone() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(FakeDispatcher::new());
    let harness = Harness::new(settings(root.path()), dispatcher.clone());
    let mut owner = script_owner("blog", "echo build");
    owner.source = SourceDescriptor::Git(CustomGitRepo {
        url: "https://git.example.com/site/blog.git".to_string(),
        branch: "main".to_string(),
        ssh_key: None,
        submodules: false,
    });

    harness.executor.rebuild(&owner, "").await.unwrap();

    let script = &dispatcher.commands()[0];
    assert!(!script.contains("git clone"));
    assert!(script.contains("echo build"));
    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.title, REBUILD_TITLE);
}

#[tokio::test]
async fn test_stop_scales_down_and_idles() {
    let root = TempDir::new().unwrap();
    let harness = Harness::new(settings(root.path()), Arc::new(FakeDispatcher::new()));
    let owner = script_owner("blog", "echo build");

    harness
        .executor
        .deploy(&owner, DEFAULT_TITLE, "")
        .await
        .unwrap();
    harness.executor.stop(&owner).await.unwrap();

    assert_eq!(
        *harness.services.scaled.lock().unwrap(),
        vec![("blog".to_string(), 0)]
    );
    assert_eq!(
        harness.executor.status(&owner.status_key()).await.unwrap(),
        OwnerStatus::Idle
    );
    let record = harness.repository.list_by_owner(&owner.owner).await.unwrap()[0].clone();
    assert_eq!(record.status, DeploymentStatus::Idle);
}

#[tokio::test]
async fn test_stop_is_refused_while_running() {
    let root = TempDir::new().unwrap();
    let harness = Harness::new(settings(root.path()), Arc::new(FakeDispatcher::new()));
    let owner = script_owner("blog", "echo build");
    harness
        .repository
        .set_owner_status(&owner.status_key(), OwnerStatus::Running)
        .await
        .unwrap();

    let result = harness.executor.stop(&owner).await;
    assert!(matches!(result, Err(DeckhandError::InvalidTransition(_))));
    assert!(harness.services.scaled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_deployments() {
    let root = TempDir::new().unwrap();
    let harness = Harness::new(settings(root.path()), shell());
    let owner = script_owner("blog", "echo build");

    harness.executor.deploy(&owner, DEFAULT_TITLE, "").await.unwrap();
    harness.executor.deploy(&owner, DEFAULT_TITLE, "").await.unwrap();
    assert_eq!(harness.repository.len(), 2);

    harness.executor.remove_deployments(&owner).await.unwrap();
    assert!(harness.repository.is_empty());
    assert!(!root.path().join("local/logs/blog").exists());
}

#[tokio::test]
async fn test_database_deploy_tracks_status_only() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(FakeDispatcher::new());
    let harness = Harness::new(settings(root.path()), dispatcher.clone());
    let database = DatabaseOwner {
        id: "pg-1".to_string(),
        app_name: "pg-main".to_string(),
        server_id: None,
        runtime: runtime("pg-main"),
    };

    harness.executor.deploy_database(&database).await.unwrap();

    assert_eq!(dispatcher.commands(), vec!["docker pull pg-main:latest"]);
    assert_eq!(*harness.services.converged.lock().unwrap(), vec!["pg-main"]);
    assert_eq!(
        harness
            .executor
            .status(&StatusKey::Database("pg-1".to_string()))
            .await
            .unwrap(),
        OwnerStatus::Done
    );
    assert!(harness.repository.is_empty());
}

#[tokio::test]
async fn test_database_pull_failure() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(FakeDispatcher::new().failing_on("docker pull"));
    let harness = Harness::new(settings(root.path()), dispatcher);
    let database = DatabaseOwner {
        id: "pg-1".to_string(),
        app_name: "pg-main".to_string(),
        server_id: None,
        runtime: runtime("pg-main"),
    };

    assert!(harness.executor.deploy_database(&database).await.is_err());
    assert_eq!(
        harness.executor.status(&database.status_key()).await.unwrap(),
        OwnerStatus::Error
    );
    assert!(harness.services.converged.lock().unwrap().is_empty());
}

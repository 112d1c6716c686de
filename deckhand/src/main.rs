//! Deckhand - Entry Point
//!
//! Control plane tooling for self-hosted deployments: prepares a host, deploys an
//! owner described in a JSON file and inspects routing documents.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use deckhand::deploy::executor::DEFAULT_TITLE;
use deckhand::deploy::{DeployOwner, DeploymentExecutor};
use deckhand::errors::DeckhandError;
use deckhand::exec::{ExecTarget, ShellDispatcher};
use deckhand::filesys::file::File;
use deckhand::logs::{init_logging, LogOptions};
use deckhand::notify::{LogNotifier, Notifier, WebhookNotifier};
use deckhand::orchestrator::SwarmServiceBuilder;
use deckhand::routing::{Reconciler, StaticResolver};
use deckhand::storage::layout::StorageLayout;
use deckhand::storage::repository::JsonFileRepository;
use deckhand::storage::settings::Settings;
use deckhand::utils::{run_diagnostic, version_info};

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version info: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => StorageLayout::default().settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("Unable to read settings file {}: {e}", settings_file.path().display());
            return;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let dispatcher = Arc::new(ShellDispatcher::from_settings(&settings));
    let reconciler = Reconciler::new(
        settings.clone(),
        dispatcher.clone(),
        Arc::new(StaticResolver::new()),
    );

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        run_diagnostic(&settings, &reconciler).await;
        return;
    }

    let target = ExecTarget::from_server_id(cli_args.get("server").map(String::as_str));

    // Prepare the host
    if cli_args.contains_key("init") {
        if let Err(e) = init_host(&settings, &reconciler, &target).await {
            error!("Failed to initialize {}: {e}", target);
        }
        return;
    }

    // Print one routing document, or replace it with an edited file
    if let Some(name) = cli_args.get("document") {
        if let Some(path) = cli_args.get("write") {
            let written = match File::new(path).read_string().await {
                Ok(raw) => reconciler.write_document(&target, name, &raw).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!("Failed to write document {}: {e}", name);
                std::process::exit(1);
            }
            return;
        }
        match reconciler.read_document(&target, name).await {
            Ok(Some(raw)) => print!("{}", raw),
            Ok(None) => println!("Document {} does not exist on {}", name, target),
            Err(e) => error!("Failed to read document {}: {e}", name),
        }
        return;
    }

    // Deploy an owner described in a JSON file
    if let Some(path) = cli_args.get("deploy") {
        let title = cli_args
            .get("title")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TITLE);
        let description = cli_args.get("description").map(String::as_str).unwrap_or("");
        if let Err(e) = deploy_from_file(settings.clone(), dispatcher, path, title, description).await {
            error!("Deployment failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    println!("Usage: deckhand [--settings=<file>] [--server=<id>] --init | --diagnostic | --document=<name> [--write=<file>] | --deploy=<owner.json> | --version");
}

async fn load_settings(file: &File) -> Result<Settings, DeckhandError> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await
}

async fn init_host(
    settings: &Settings,
    reconciler: &Reconciler,
    target: &ExecTarget,
) -> Result<(), DeckhandError> {
    if !target.is_remote() {
        StorageLayout::for_target(settings, target).setup().await?;
    }
    reconciler.create_default_middlewares(target).await?;
    info!("Initialized {}", target);
    Ok(())
}

async fn deploy_from_file(
    settings: Arc<Settings>,
    dispatcher: Arc<ShellDispatcher>,
    path: &str,
    title: &str,
    description: &str,
) -> Result<(), DeckhandError> {
    let owner = File::new(path).read_json::<DeployOwner>().await?;

    let notifier: Arc<dyn Notifier> = match &settings.notification_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };
    let repository = JsonFileRepository::open(
        StorageLayout::for_target(&settings, &ExecTarget::Local).deployments_file(),
    )
    .await?;
    let services = Arc::new(SwarmServiceBuilder::new(dispatcher.clone(), settings.network.clone()));
    let executor = DeploymentExecutor::new(
        settings,
        dispatcher,
        Arc::new(repository),
        services,
        notifier,
    );

    info!("Running Deckhand deployment for {}", owner.owner);
    let result = executor.deploy(&owner, title, description).await;
    match executor.status(&owner.status_key()).await {
        Ok(status) => info!("{} is now {:?}", owner.owner, status),
        Err(e) => warn!("Unable to read the status of {}: {e}", owner.owner),
    }
    result
}

//! Utility functions

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::exec::ExecTarget;
use crate::routing::Reconciler;
use crate::storage::layout::{StorageLayout, MIDDLEWARES_DOCUMENT};
use crate::storage::settings::Settings;

/// Version information for deckhand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Print what the control host and every configured server look like
pub async fn run_diagnostic(settings: &Settings, reconciler: &Reconciler) {
    println!("deckhand {}", version_info().version);

    let layout = StorageLayout::for_target(settings, &ExecTarget::Local);
    println!("Base directory: {}", layout.base_dir.display());
    for dir in [
        layout.logs_dir(),
        layout.dynamic_traefik_dir(),
        layout.applications_dir(),
        layout.compose_dir(),
    ] {
        let state = if dir.exists().await { "ok" } else { "missing" };
        println!("  {} [{}]", dir.path().display(), state);
    }

    let mut targets = vec![ExecTarget::Local];
    targets.extend(settings.servers.keys().map(|id| ExecTarget::Remote(id.clone())));

    let reads = targets
        .iter()
        .map(|target| reconciler.read_document(target, MIDDLEWARES_DOCUMENT));
    for (target, result) in targets.iter().zip(join_all(reads).await) {
        match result {
            Ok(Some(_)) => println!("Shared middlewares on {}: present", target),
            Ok(None) => println!("Shared middlewares on {}: missing", target),
            Err(e) => println!("Shared middlewares on {}: unreachable ({})", target, e),
        }
    }
}

//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for the rolling process log, if any
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Storage root on the control host
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Storage root on remote hosts
    #[serde(default = "default_base_dir")]
    pub remote_base_dir: PathBuf,

    /// Public URL of the dashboard, used for build links
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Webhook receiving build notifications
    #[serde(default)]
    pub notification_webhook: Option<String>,

    /// Overlay network attached to every swarm service
    #[serde(default = "default_network")]
    pub network: String,

    /// Deployment history retention
    #[serde(default)]
    pub retention: RetentionSettings,

    /// Remote hosts by server id
    #[serde(default)]
    pub servers: BTreeMap<String, ServerSettings>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/etc/dokploy")
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_network() -> String {
    "dokploy-network".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            base_dir: default_base_dir(),
            remote_base_dir: default_base_dir(),
            public_url: default_public_url(),
            notification_webhook: None,
            network: default_network(),
            retention: RetentionSettings::default(),
            servers: BTreeMap::new(),
        }
    }
}

/// How many deployments are kept per owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Applications, compose stacks and preview deployments
    #[serde(default = "default_window")]
    pub default_window: usize,

    /// Server setup runs
    #[serde(default = "default_server_window")]
    pub server_window: usize,
}

fn default_window() -> usize {
    10
}

fn default_server_window() -> usize {
    5
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            default_window: default_window(),
            server_window: default_server_window(),
        }
    }
}

/// SSH access to a remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Hostname or IP address
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user
    #[serde(default = "default_ssh_user")]
    pub username: String,

    /// Private key used for the session
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

//! Docker Swarm services through `docker service`

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::DeckhandError;
use crate::exec::quote::shell_quote;
use crate::exec::{Dispatcher, ExecTarget};
use crate::orchestrator::{MountKind, PortMapping, RuntimeSpec, ScalingMode, ServiceSpecBuilder};

/// Service builder issuing `docker service` commands on the target host
pub struct SwarmServiceBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    network: String,
}

impl SwarmServiceBuilder {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, network: impl Into<String>) -> Self {
        Self {
            dispatcher,
            network: network.into(),
        }
    }

    /// `docker service create` for a spec
    pub fn create_command(&self, spec: &RuntimeSpec) -> String {
        let mut cmd = format!(
            "docker service create --name {} --with-registry-auth --network {}",
            shell_quote(&spec.service_name),
            shell_quote(&self.network)
        );
        for network in &spec.networks {
            cmd.push_str(&format!(" --network {}", shell_quote(network)));
        }
        for (key, value) in &spec.env {
            cmd.push_str(&format!(" --env {}", shell_quote(&format!("{}={}", key, value))));
        }
        for mount in &spec.mounts {
            cmd.push_str(&format!(" --mount {}", mount_arg(mount.kind, &mount.source, &mount.target)));
        }
        for port in &spec.ports {
            cmd.push_str(&format!(" --publish {}", port_arg(port)));
        }
        cmd.push_str(&resource_flags(spec));
        match spec.mode {
            ScalingMode::Replicated { replicas } => cmd.push_str(&format!(" --replicas {}", replicas)),
            ScalingMode::Global => cmd.push_str(" --mode global"),
        }
        cmd.push_str(&format!(" {}", shell_quote(&spec.image)));
        if let Some(command) = &spec.command {
            cmd.push_str(&format!(" sh -c {}", shell_quote(command)));
        }
        cmd
    }

    /// `docker service update` moving a running service to a spec
    ///
    /// Env vars, mounts and ports the running service has but the spec no longer
    /// declares are removed.
    pub fn update_command(&self, spec: &RuntimeSpec, current: &CurrentService) -> String {
        let mut cmd = format!(
            "docker service update --with-registry-auth --force --image {}",
            shell_quote(&spec.image)
        );
        for key in current.env_keys.iter().filter(|key| !spec.env.contains_key(*key)) {
            cmd.push_str(&format!(" --env-rm {}", shell_quote(key)));
        }
        for (key, value) in &spec.env {
            cmd.push_str(&format!(" --env-add {}", shell_quote(&format!("{}={}", key, value))));
        }
        for target in current
            .mount_targets
            .iter()
            .filter(|target| !spec.mounts.iter().any(|m| &m.target == *target))
        {
            cmd.push_str(&format!(" --mount-rm {}", shell_quote(target)));
        }
        for mount in &spec.mounts {
            cmd.push_str(&format!(" --mount-add {}", mount_arg(mount.kind, &mount.source, &mount.target)));
        }
        for port in current.ports.iter().filter(|port| !spec.ports.contains(port)) {
            cmd.push_str(&format!(" --publish-rm {}", port_arg(port)));
        }
        for port in &spec.ports {
            cmd.push_str(&format!(" --publish-add {}", port_arg(port)));
        }
        cmd.push_str(&resource_flags(spec));
        if let ScalingMode::Replicated { replicas } = spec.mode {
            cmd.push_str(&format!(" --replicas {}", replicas));
        }
        cmd.push_str(&format!(" {}", shell_quote(&spec.service_name)));
        cmd
    }
}

/// What a running service currently declares, from `docker service inspect`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentService {
    pub env_keys: BTreeSet<String>,
    pub mount_targets: BTreeSet<String>,
    pub ports: Vec<PortMapping>,
    pub global: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedSpec {
    task_template: InspectedTask,
    mode: InspectedMode,
    endpoint_spec: InspectedEndpoint,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedTask {
    container_spec: InspectedContainer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedContainer {
    env: Vec<String>,
    mounts: Vec<InspectedMount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedMount {
    target: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedMode {
    global: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedEndpoint {
    ports: Vec<InspectedPort>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedPort {
    protocol: Option<String>,
    target_port: u16,
    published_port: Option<u16>,
}

impl CurrentService {
    /// Parse the output of `docker service inspect --format '{{json .Spec}}'`
    pub fn parse(output: &str) -> Result<Self, DeckhandError> {
        if output.trim().is_empty() {
            return Ok(Self::default());
        }
        let spec: InspectedSpec = serde_json::from_str(output.trim())?;
        Ok(Self {
            env_keys: spec
                .task_template
                .container_spec
                .env
                .iter()
                .map(|entry| entry.split_once('=').map(|(k, _)| k).unwrap_or(entry.as_str()).to_string())
                .collect(),
            mount_targets: spec
                .task_template
                .container_spec
                .mounts
                .into_iter()
                .map(|mount| mount.target)
                .collect(),
            ports: spec
                .endpoint_spec
                .ports
                .into_iter()
                .filter_map(|port| {
                    Some(PortMapping {
                        published: port.published_port?,
                        target: port.target_port,
                        protocol: port.protocol.unwrap_or_else(|| "tcp".to_string()),
                    })
                })
                .collect(),
            global: spec.mode.global.is_some(),
        })
    }
}

fn mount_arg(kind: MountKind, source: &str, target: &str) -> String {
    let kind = match kind {
        MountKind::Bind => "bind",
        MountKind::Volume => "volume",
    };
    shell_quote(&format!("type={},source={},target={}", kind, source, target))
}

fn port_arg(port: &PortMapping) -> String {
    shell_quote(&format!(
        "published={},target={},protocol={}",
        port.published, port.target, port.protocol
    ))
}

fn resource_flags(spec: &RuntimeSpec) -> String {
    let mut flags = String::new();
    if let Some(cpus) = spec.resources.cpu_limit {
        flags.push_str(&format!(" --limit-cpu {}", cpus));
    }
    if let Some(memory) = spec.resources.memory_limit_mb {
        flags.push_str(&format!(" --limit-memory {}M", memory));
    }
    flags
}

fn is_missing_service(err: &DeckhandError) -> bool {
    match err {
        DeckhandError::Exec { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("no such service") || stderr.contains("not found")
        }
        _ => false,
    }
}

#[async_trait]
impl ServiceSpecBuilder for SwarmServiceBuilder {
    async fn converge(&self, target: &ExecTarget, spec: &RuntimeSpec) -> Result<(), DeckhandError> {
        let inspect = format!(
            "docker service inspect {} --format '{{{{json .Spec}}}}'",
            shell_quote(&spec.service_name)
        );

        let current = match self.dispatcher.execute(target, &inspect, None).await {
            Ok(output) => CurrentService::parse(&output.stdout)?,
            Err(e) if is_missing_service(&e) => {
                info!("Creating service {} on {}", spec.service_name, target);
                self.dispatcher
                    .execute(target, &self.create_command(spec), None)
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // The scaling mode of a swarm service cannot be updated in place
        if current.global != matches!(spec.mode, ScalingMode::Global) {
            info!("Recreating service {} on {} to change its mode", spec.service_name, target);
            let command = format!(
                "docker service rm {} && {}",
                shell_quote(&spec.service_name),
                self.create_command(spec)
            );
            self.dispatcher.execute(target, &command, None).await?;
            return Ok(());
        }

        info!("Updating service {} on {}", spec.service_name, target);
        debug!("Running service {} declares {:?}", spec.service_name, current);
        self.dispatcher
            .execute(target, &self.update_command(spec, &current), None)
            .await?;
        Ok(())
    }

    async fn scale(
        &self,
        target: &ExecTarget,
        service_name: &str,
        replicas: u64,
    ) -> Result<(), DeckhandError> {
        info!("Scaling service {} on {} to {} replicas", service_name, target, replicas);
        let command = format!(
            "docker service scale {}={}",
            shell_quote(service_name),
            replicas
        );
        self.dispatcher.execute(target, &command, None).await?;
        Ok(())
    }
}

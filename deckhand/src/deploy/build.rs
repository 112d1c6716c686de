//! Build steps

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deploy::command::{Step, StepKind};
use crate::exec::quote::{decoded, shell_quote};

/// How an owner's code becomes something runnable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BuildType {
    Dockerfile {
        /// Dockerfile path, relative to the code path
        #[serde(default = "default_dockerfile")]
        dockerfile: String,
        /// Build context, relative to the code path
        #[serde(default = "default_context")]
        context: String,
        #[serde(default)]
        target_stage: Option<String>,
    },
    Nixpacks,
    Railpack,
    Heroku {
        #[serde(default = "default_heroku_version")]
        version: String,
    },
    Paketo,
    /// Compose file brought up as a whole
    Compose {
        /// Compose file path, relative to the code path
        #[serde(default = "default_compose_path")]
        compose_path: String,
        #[serde(default)]
        kind: ComposeKind,
    },
    /// Plain script, used to set up servers
    Script { script: String },
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> String {
    ".".to_string()
}

fn default_heroku_version() -> String {
    "24".to_string()
}

fn default_compose_path() -> String {
    "docker-compose.yml".to_string()
}

/// Compose flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeKind {
    #[default]
    DockerCompose,
    Stack,
}

/// Values a build step is rendered with
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    pub app_name: &'a str,
    pub code_path: &'a str,
    pub env: &'a BTreeMap<String, String>,
}

impl BuildType {
    /// Build step for this build type
    pub fn build_step(&self, ctx: &BuildContext<'_>) -> Step {
        let app = shell_quote(ctx.app_name);
        let code = shell_quote(ctx.code_path);

        let script = match self {
            BuildType::Dockerfile {
                dockerfile,
                context,
                target_stage,
            } => {
                let mut cmd = format!(
                    "docker build -t {}:latest -f {}",
                    ctx.app_name,
                    shell_quote(&join(ctx.code_path, dockerfile))
                );
                if let Some(stage) = target_stage {
                    cmd.push_str(&format!(" --target {}", shell_quote(stage)));
                }
                cmd.push_str(&env_flags("--build-arg", ctx.env));
                cmd.push_str(&format!(" {}", shell_quote(&join(ctx.code_path, context))));
                cmd
            }
            BuildType::Nixpacks => format!(
                "nixpacks build {} --name {}{}",
                code,
                app,
                env_flags("--env", ctx.env)
            ),
            BuildType::Railpack => {
                let plan = shell_quote(&join(ctx.code_path, "railpack-plan.json"));
                format!(
                    "railpack prepare {code} --plan-out {plan} --info-out {info}{env}\n\
                     docker buildx build --build-arg BUILDKIT_SYNTAX=ghcr.io/railwayapp/railpack-frontend \
                     -f {plan} -t {app} {code}",
                    code = code,
                    plan = plan,
                    info = shell_quote(&join(ctx.code_path, "railpack-info.json")),
                    env = env_flags("--env", ctx.env),
                    app = app,
                )
            }
            BuildType::Heroku { version } => format!(
                "pack build {} --path {} --builder {}{}",
                app,
                code,
                shell_quote(&format!("heroku/builder:{}", version)),
                env_flags("--env", ctx.env)
            ),
            BuildType::Paketo => format!(
                "pack build {} --path {} --builder paketobuildpacks/builder-jammy-full{}",
                app,
                code,
                env_flags("--env", ctx.env)
            ),
            BuildType::Compose { compose_path, kind } => {
                let file = join(ctx.code_path, compose_path);
                let env_file = match file.rsplit_once('/') {
                    Some((dir, _)) => format!("{}/.env", dir),
                    None => ".env".to_string(),
                };
                let up = match kind {
                    ComposeKind::DockerCompose => format!(
                        "docker compose -p {} -f {} up -d --build --remove-orphans",
                        app,
                        shell_quote(&file)
                    ),
                    ComposeKind::Stack => format!(
                        "docker stack deploy -c {} {} --prune --with-registry-auth",
                        shell_quote(&file),
                        app
                    ),
                };
                format!(
                    "{} > {}\ncd {}\n{}",
                    decoded(&env_file_content(ctx.env)),
                    shell_quote(&env_file),
                    code,
                    up
                )
            }
            BuildType::Script { script } => {
                return Step::new(StepKind::Custom, "setup", script.clone());
            }
        };

        Step::new(StepKind::Build, "build", script)
    }

    /// Command stopping what the build started, for builds not run as a swarm service
    pub fn stop_command(&self, app_name: &str) -> Option<String> {
        match self {
            BuildType::Compose {
                kind: ComposeKind::DockerCompose,
                ..
            } => Some(format!("docker compose -p {} stop", shell_quote(app_name))),
            BuildType::Compose {
                kind: ComposeKind::Stack,
                ..
            } => Some(format!("docker stack rm {}", shell_quote(app_name))),
            _ => None,
        }
    }
}

fn join(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches("./");
    if relative.is_empty() || relative == "." {
        base.trim_end_matches('/').to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), relative.trim_start_matches('/'))
    }
}

fn env_flags(flag: &str, env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!(" {} {}", flag, shell_quote(&format!("{}={}", key, value))))
        .collect()
}

fn env_file_content(env: &BTreeMap<String, String>) -> String {
    let mut content: String = env
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect();
    if !env.contains_key("DOCKER_CONFIG") {
        content.push_str("DOCKER_CONFIG=/root/.docker/config.json\n");
    }
    content
}

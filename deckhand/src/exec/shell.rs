//! Shell dispatcher: `bash -c` locally, `ssh` for remote hosts

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeckhandError;
use crate::exec::quote::shell_quote;
use crate::exec::{ChunkSink, Dispatcher, ExecOutput, ExecTarget};
use crate::storage::settings::{ServerSettings, Settings};

/// Dispatcher spawning a shell per command
#[derive(Debug, Clone)]
pub struct ShellDispatcher {
    servers: BTreeMap<String, ServerSettings>,
    shell: String,
}

impl ShellDispatcher {
    /// Create a dispatcher knowing the given remote hosts
    pub fn new(servers: BTreeMap<String, ServerSettings>) -> Self {
        Self {
            servers,
            shell: "bash".to_string(),
        }
    }

    /// Create a dispatcher from the settings' server table
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.servers.clone())
    }

    /// Build the process for a command without spawning it
    pub fn build_command(
        &self,
        target: &ExecTarget,
        command: &str,
    ) -> Result<Command, DeckhandError> {
        match target {
            ExecTarget::Local => {
                let mut cmd = Command::new(&self.shell);
                cmd.arg("-c").arg(command);
                Ok(cmd)
            }
            ExecTarget::Remote(server_id) => {
                let server = self
                    .servers
                    .get(server_id)
                    .ok_or_else(|| DeckhandError::NotFound(format!("server {}", server_id)))?;

                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"])
                    .args(["-o", "StrictHostKeyChecking=accept-new"])
                    .arg("-p")
                    .arg(server.port.to_string());
                if let Some(identity) = &server.identity_file {
                    cmd.arg("-i").arg(identity);
                }
                cmd.arg(format!("{}@{}", server.username, server.host));
                cmd.arg(format!("{} -c {}", self.shell, shell_quote(command)));
                Ok(cmd)
            }
        }
    }
}

#[async_trait]
impl Dispatcher for ShellDispatcher {
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
        on_chunk: Option<&ChunkSink>,
    ) -> Result<ExecOutput, DeckhandError> {
        debug!("Executing command on {}", target);

        let mut cmd = self.build_command(target, command)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| DeckhandError::Exec {
            command: command.to_string(),
            code: None,
            stdout: String::new(),
            stderr: format!("failed to spawn {}: {}", self.shell, e),
        })?;

        let (stdout, stderr) = tokio::join!(
            read_lines(child.stdout.take(), on_chunk),
            read_lines(child.stderr.take(), on_chunk),
        );
        let stdout = stdout?;
        let stderr = stderr?;
        let status = child.wait().await?;

        if !status.success() {
            debug!("Command failed on {} with exit code {:?}", target, status.code());
            return Err(DeckhandError::Exec {
                command: command.to_string(),
                code: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

async fn read_lines<R>(stream: Option<R>, on_chunk: Option<&ChunkSink>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(stream) = stream else {
        return Ok(captured);
    };

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(sink) = on_chunk {
            sink(&line);
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}

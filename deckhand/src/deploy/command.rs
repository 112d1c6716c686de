//! Typed deploy scripts
//!
//! Deploy work is described as a list of [`Step`]s and rendered once into a
//! single shell script. All values coming from owners (paths, urls, secrets,
//! messages) are quoted or base64 transported here and nowhere else.

use crate::exec::quote::{decoded, shell_quote};

/// Marker ending the log of every failed deployment
pub const ERROR_MARKER: &str = "Error occurred ❌, check the logs for details.";

/// First line of every deployment log
pub const INIT_MARKER: &str = "Initializing deployment";

const EXTRA_LOGS_SEPARATOR: &str =
    "===================================EXTRA LOGS============================================";

/// What a step contributes to a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Fetch the source (git clone, image pull)
    Clone,
    /// Produce the runnable artifact
    Build,
    /// Anything else, like a server setup script
    Custom,
}

/// One unit of shell work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub label: String,
    pub script: String,
}

impl Step {
    pub fn new(kind: StepKind, label: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            script: script.into(),
        }
    }
}

/// Builder for the composite command of a deployment
///
/// The rendered script stops at the first failing line and appends everything it
/// prints to the deployment log.
#[derive(Debug, Clone)]
pub struct DeployScript {
    log_path: String,
    steps: Vec<Step>,
}

impl DeployScript {
    pub fn new(log_path: impl Into<String>) -> Self {
        Self {
            log_path: log_path.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a step if present
    pub fn maybe_step(self, step: Option<Step>) -> Self {
        match step {
            Some(step) => self.step(step),
            None => self,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render the script
    pub fn render(&self) -> String {
        let mut body = String::new();
        for step in &self.steps {
            body.push_str(&format!("echo {}\n", shell_quote(&format!("==> {}", step.label))));
            body.push_str(step.script.trim());
            body.push('\n');
        }

        format!(
            "set -e\n{{\n{}}} >> {} 2>&1\n",
            body,
            shell_quote(&self.log_path)
        )
    }
}

/// Command appending `text` and a newline to a log file
pub fn append_line(log_path: &str, text: &str) -> String {
    format!("{} >> {}", decoded(&format!("{}\n", text)), shell_quote(log_path))
}

/// Command closing the log of a failed deployment
///
/// `internal_message` is the text of an error the dispatcher never saw; it is
/// written under a separator before the closing marker. Execution failures pass
/// `None` since their output is already in the log.
pub fn error_block(log_path: &str, internal_message: Option<&str>) -> String {
    let mut text = String::from("\n");
    if let Some(message) = internal_message {
        text.push_str(&format!("\n{}\n{}\n", EXTRA_LOGS_SEPARATOR, message));
    }
    text.push_str(ERROR_MARKER);
    text.push('\n');
    format!("{} >> {}", decoded(&text), shell_quote(log_path))
}

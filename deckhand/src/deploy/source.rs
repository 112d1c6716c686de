//! Source descriptors and their clone steps

use serde::{Deserialize, Serialize};

use crate::deploy::command::{Step, StepKind};
use crate::exec::quote::{decoded, shell_quote};

/// Something a deployment can fetch its code or image from
pub trait SourceProvider {
    /// Step fetching the source into `code_path`, if the source needs fetching
    fn clone_step(&self, code_path: &str) -> Option<Step>;

    /// Whether `code_path` ends up as a git checkout
    fn is_git(&self) -> bool {
        false
    }

    /// Whether the fetched source still has to be built
    fn needs_build(&self) -> bool {
        true
    }
}

/// Where an owner's code comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SourceDescriptor {
    /// Repository on a hosted git provider
    Hosted(HostedRepo),
    /// Any git remote, optionally over ssh
    Git(CustomGitRepo),
    /// Prebuilt image
    Docker(DockerImage),
    /// Code uploaded to the code path beforehand
    Drop,
}

impl SourceDescriptor {
    /// The clone capability of this source
    pub fn provider(&self) -> &dyn SourceProvider {
        match self {
            SourceDescriptor::Hosted(repo) => repo,
            SourceDescriptor::Git(repo) => repo,
            SourceDescriptor::Docker(image) => image,
            SourceDescriptor::Drop => &DroppedCode,
        }
    }
}

/// Hosted git provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
    Gitlab,
    Bitbucket,
    Gitea,
}

impl GitProvider {
    fn default_host(&self) -> Option<&'static str> {
        match self {
            GitProvider::Github => Some("github.com"),
            GitProvider::Gitlab => Some("gitlab.com"),
            GitProvider::Bitbucket => Some("bitbucket.org"),
            GitProvider::Gitea => None,
        }
    }

    /// User part of a credentialed clone url when none is configured
    fn token_user(&self) -> &'static str {
        match self {
            GitProvider::Bitbucket => "x-token-auth",
            _ => "oauth2",
        }
    }
}

/// Repository on a hosted provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedRepo {
    pub provider: GitProvider,

    /// Provider host; required for self-hosted providers
    #[serde(default)]
    pub host: Option<String>,

    /// Owner or namespace path
    pub owner: String,

    pub repository: String,

    pub branch: String,

    /// Access token or app password
    #[serde(default)]
    pub token: Option<String>,

    /// User for app password auth (bitbucket)
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub submodules: bool,
}

impl HostedRepo {
    fn host(&self) -> &str {
        self.host
            .as_deref()
            .or_else(|| self.provider.default_host())
            .unwrap_or("localhost")
            .trim_end_matches('/')
    }

    /// Repository location without credentials, safe to print
    pub fn display_url(&self) -> String {
        format!("{}/{}/{}.git", self.host(), self.owner, self.repository)
    }

    /// Clone url, embedding credentials when configured
    pub fn clone_url(&self) -> String {
        match &self.token {
            Some(token) => {
                let user = self
                    .username
                    .as_deref()
                    .unwrap_or_else(|| self.provider.token_user());
                format!("https://{}:{}@{}", user, token, self.display_url())
            }
            None => format!("https://{}", self.display_url()),
        }
    }
}

impl SourceProvider for HostedRepo {
    fn clone_step(&self, code_path: &str) -> Option<Step> {
        Some(git_clone_step(
            &self.clone_url(),
            &self.display_url(),
            &self.branch,
            self.submodules,
            code_path,
            None,
        ))
    }

    fn is_git(&self) -> bool {
        true
    }
}

/// Arbitrary git remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomGitRepo {
    pub url: String,

    pub branch: String,

    /// Private key for ssh remotes
    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default)]
    pub submodules: bool,
}

impl SourceProvider for CustomGitRepo {
    fn clone_step(&self, code_path: &str) -> Option<Step> {
        let key = self.ssh_key.as_deref().map(|key| {
            let key_path = format!("{}.key", code_path.trim_end_matches('/'));
            (key, key_path)
        });
        let mut step = git_clone_step(
            &self.url,
            &self.url,
            &self.branch,
            self.submodules,
            code_path,
            key.as_ref().map(|(_, path)| path.as_str()),
        );

        if let Some((key, key_path)) = key {
            let quoted = shell_quote(&key_path);
            step.script = format!(
                "{} > {}\nchmod 600 {}\n{}\nrm -f {}",
                decoded(&format!("{}\n", key.trim_end())),
                quoted,
                quoted,
                step.script,
                quoted
            );
        }
        Some(step)
    }

    fn is_git(&self) -> bool {
        true
    }
}

/// Prebuilt image, optionally from a private registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerImage {
    pub image: String,

    #[serde(default)]
    pub registry_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl SourceProvider for DockerImage {
    fn clone_step(&self, _code_path: &str) -> Option<Step> {
        let mut script = String::new();
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            script.push_str(&format!(
                "{} | docker login {} --username {} --password-stdin\n",
                decoded(password),
                shell_quote(self.registry_url.as_deref().unwrap_or("")),
                shell_quote(username)
            ));
        }
        script.push_str(&format!("docker pull {}", shell_quote(&self.image)));
        Some(Step::new(StepKind::Clone, "pull image", script))
    }

    fn needs_build(&self) -> bool {
        false
    }
}

/// Code uploaded by the user
struct DroppedCode;

impl SourceProvider for DroppedCode {
    fn clone_step(&self, _code_path: &str) -> Option<Step> {
        None
    }
}

fn git_clone_step(
    clone_url: &str,
    display_url: &str,
    branch: &str,
    submodules: bool,
    code_path: &str,
    ssh_key_path: Option<&str>,
) -> Step {
    let path = shell_quote(code_path);
    let ssh = match ssh_key_path {
        Some(key_path) => format!(
            "GIT_SSH_COMMAND={} ",
            shell_quote(&format!(
                "ssh -i {} -o StrictHostKeyChecking=accept-new",
                key_path
            ))
        ),
        None => String::new(),
    };
    let submodules = if submodules { " --recurse-submodules" } else { "" };

    let script = format!(
        "rm -rf {path}\n\
         mkdir -p {path}\n\
         if ! {ssh}git clone --branch {branch} --depth 1{submodules} --progress {url} {path}; then\n\
         \techo {failed}\n\
         \texit 1\n\
         fi\n\
         echo {cloned}",
        path = path,
        ssh = ssh,
        branch = shell_quote(branch),
        submodules = submodules,
        url = shell_quote(clone_url),
        failed = shell_quote(&format!("❌ [ERROR] Fail to clone the repository {}", display_url)),
        cloned = shell_quote(&format!("Cloned {} to {}: ✅", display_url, code_path)),
    );
    Step::new(StepKind::Clone, "clone", script)
}

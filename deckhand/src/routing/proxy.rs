//! Standalone proxy bindings
//!
//! A proxy owns the whole `proxy-{id}` document, its path middlewares included.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::DeckhandError;
use crate::exec::ExecTarget;
use crate::routing::domain::CertificateMode;
use crate::routing::names::{self, REDIRECT_TO_HTTPS, WEBSECURE_ENTRYPOINT, WEB_ENTRYPOINT};
use crate::routing::types::{Middleware, Router, RouterTls, Service};
use crate::routing::Reconciler;

const DEFAULT_PROXY_PORT: u16 = 3000;

/// Where a proxy forwards to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum ProxyTarget {
    /// Literal backend URL
    Url(String),
    /// Application by id
    Application(String),
    /// Compose stack by id
    Compose(String),
    /// Swarm service by name
    Service(String),
}

/// A routing owner that is not an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyBinding {
    pub proxy_id: String,

    #[serde(default)]
    pub server_id: Option<String>,

    /// Host, `*.example.com` for wildcard bindings
    pub host: String,

    #[serde(default)]
    pub is_wildcard: bool,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub internal_path: Option<String>,

    #[serde(default)]
    pub strip_path: bool,

    pub target: ProxyTarget,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub https: bool,

    #[serde(default)]
    pub certificate_type: CertificateMode,

    #[serde(default)]
    pub custom_cert_resolver: Option<String>,

    #[serde(default)]
    pub priority: Option<i64>,
}

impl ProxyBinding {
    pub fn target_host(&self) -> ExecTarget {
        ExecTarget::from_server_id(self.server_id.as_deref())
    }

    pub fn document_name(&self) -> String {
        names::proxy_document(&self.proxy_id)
    }

    fn strip_middleware(&self) -> String {
        format!("stripprefix-{}", self.document_name())
    }

    fn add_middleware(&self) -> String {
        format!("addprefix-{}", self.document_name())
    }

    fn path_prefix(&self) -> Option<&str> {
        self.path.as_deref().filter(|path| *path != "/")
    }

    fn stripped_prefix(&self) -> Option<&str> {
        if self.strip_path {
            self.path_prefix()
        } else {
            None
        }
    }

    fn added_prefix(&self) -> Option<&str> {
        self.internal_path
            .as_deref()
            .filter(|internal| *internal != "/" && Some(*internal) != self.path.as_deref())
    }

    /// Match rule, with a `HostRegexp` for wildcard hosts
    pub fn rule(&self) -> String {
        let mut rule = match self.host.strip_prefix("*.") {
            Some(domain) if self.is_wildcard => format!(
                "HostRegexp(`^[a-zA-Z0-9-]+\\.{}$`)",
                regex::escape(domain)
            ),
            _ => format!("Host(`{}`)", self.host),
        };
        if let Some(path) = self.path_prefix() {
            rule.push_str(&format!(" && PathPrefix(`{}`)", path));
        }
        rule
    }

    fn router(&self, secure: bool) -> Router {
        let mut middlewares = Vec::new();
        if !secure && self.https {
            middlewares.push(REDIRECT_TO_HTTPS.to_string());
        } else {
            if self.stripped_prefix().is_some() {
                middlewares.push(self.strip_middleware());
            }
            if self.added_prefix().is_some() {
                middlewares.push(self.add_middleware());
            }
        }

        let tls = match (secure, self.certificate_type) {
            (true, CertificateMode::Letsencrypt) => Some(RouterTls::resolver(names::LETSENCRYPT_RESOLVER)),
            (true, CertificateMode::Custom) => self
                .custom_cert_resolver
                .as_ref()
                .map(|resolver| RouterTls::resolver(resolver.as_str())),
            _ => None,
        };

        Router {
            rule: self.rule(),
            service: format!("{}-service", self.document_name()),
            middlewares,
            entry_points: vec![if secure {
                WEBSECURE_ENTRYPOINT.to_string()
            } else {
                WEB_ENTRYPOINT.to_string()
            }],
            tls,
            priority: self.priority,
            ..Default::default()
        }
    }
}

/// Looks up the internal names of proxy targets
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Internal name of an application or compose stack, if known
    async fn app_name(&self, target: &ProxyTarget) -> Option<String>;
}

/// Resolver backed by fixed id to name maps
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    applications: HashMap<String, String>,
    composes: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, id: &str, app_name: &str) -> Self {
        self.applications.insert(id.to_string(), app_name.to_string());
        self
    }

    pub fn with_compose(mut self, id: &str, app_name: &str) -> Self {
        self.composes.insert(id.to_string(), app_name.to_string());
        self
    }
}

#[async_trait]
impl TargetResolver for StaticResolver {
    async fn app_name(&self, target: &ProxyTarget) -> Option<String> {
        match target {
            ProxyTarget::Application(id) => self.applications.get(id).cloned(),
            ProxyTarget::Compose(id) => self.composes.get(id).cloned(),
            ProxyTarget::Url(_) | ProxyTarget::Service(_) => None,
        }
    }
}

impl Reconciler {
    /// Backend URL of a proxy, resolved now
    pub async fn proxy_backend(&self, proxy: &ProxyBinding) -> String {
        let port = proxy.port.unwrap_or(DEFAULT_PROXY_PORT);
        match &proxy.target {
            ProxyTarget::Url(url) => url.clone(),
            ProxyTarget::Service(name) => format!("http://{}:{}", name, port),
            ProxyTarget::Application(id) | ProxyTarget::Compose(id) => {
                let host = match self.resolver.app_name(&proxy.target).await {
                    Some(app_name) => app_name,
                    None => {
                        debug!("Unresolved target {} of proxy {}, using its id", id, proxy.proxy_id);
                        id.clone()
                    }
                };
                format!("http://{}:{}", host, port)
            }
        }
    }

    /// Create or replace a proxy's document
    pub async fn upsert_proxy(&self, proxy: &ProxyBinding) -> Result<(), DeckhandError> {
        let target = proxy.target_host();
        let name = proxy.document_name();
        let backend = self.proxy_backend(proxy).await;

        let _lock = self.locks.lock(&target, &name).await;
        let mut config = self.store.load(&target, &name).await?;

        let middlewares = &mut config.http.middlewares;
        match proxy.stripped_prefix() {
            Some(prefix) => {
                middlewares.insert(proxy.strip_middleware(), Middleware::strip_prefix(prefix));
            }
            None => {
                middlewares.remove(&proxy.strip_middleware());
            }
        }
        match proxy.added_prefix() {
            Some(prefix) => {
                middlewares.insert(proxy.add_middleware(), Middleware::add_prefix(prefix));
            }
            None => {
                middlewares.remove(&proxy.add_middleware());
            }
        }

        let routers = &mut config.http.routers;
        routers.insert(format!("{}-router", name), proxy.router(false));
        let secure_name = format!("{}-router-websecure", name);
        if proxy.https {
            routers.insert(secure_name, proxy.router(true));
        } else {
            routers.remove(&secure_name);
        }
        config
            .http
            .services
            .insert(format!("{}-service", name), Service::single(backend));

        self.store.persist(&target, &name, &config).await?;
        info!("Routed proxy {} for {}", proxy.proxy_id, proxy.host);
        Ok(())
    }

    /// Drop a proxy's entries, deleting its document when no router is left
    pub async fn remove_proxy(&self, proxy: &ProxyBinding) -> Result<(), DeckhandError> {
        let target = proxy.target_host();
        let name = proxy.document_name();

        let _lock = self.locks.lock(&target, &name).await;
        let mut config = self.store.load(&target, &name).await?;

        config.http.routers.remove(&format!("{}-router", name));
        config.http.routers.remove(&format!("{}-router-websecure", name));
        config.http.services.remove(&format!("{}-service", name));
        config.http.middlewares.remove(&proxy.strip_middleware());
        config.http.middlewares.remove(&proxy.add_middleware());

        if config.http.routers.is_empty() {
            self.store.remove(&target, &name).await?;
        } else {
            self.store.persist(&target, &name, &config).await?;
        }
        info!("Removed proxy {}", proxy.proxy_id);
        Ok(())
    }
}

//! Domain bindings of applications, compose stacks and previews

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deploy::build::ComposeKind;
use crate::errors::DeckhandError;
use crate::exec::ExecTarget;
use crate::routing::middleware::{RedirectRule, SecurityRule};
use crate::routing::names::{self, REDIRECT_TO_HTTPS, WEBSECURE_ENTRYPOINT, WEB_ENTRYPOINT};
use crate::routing::types::{FileConfig, Middleware, Router, RouterTls, Service};
use crate::routing::Reconciler;
use crate::storage::layout::MIDDLEWARES_DOCUMENT;

/// How TLS is terminated for a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateMode {
    /// Terminated upstream, no TLS block
    #[default]
    None,
    Letsencrypt,
    Custom,
}

/// What kind of owner a binding routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    #[default]
    Application,
    Compose,
    Preview,
}

/// A host (and optional path) routed to an owner
///
/// Callers validate bindings; the reconciler trusts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainBinding {
    pub host: String,

    #[serde(default)]
    pub path: Option<String>,

    /// Prefix added before forwarding
    #[serde(default)]
    pub internal_path: Option<String>,

    #[serde(default)]
    pub strip_path: bool,

    pub port: u16,

    #[serde(default)]
    pub https: bool,

    #[serde(default)]
    pub certificate_type: CertificateMode,

    #[serde(default)]
    pub custom_cert_resolver: Option<String>,

    /// Names the router/service pair of this binding within its owner
    pub unique_config_key: u32,

    #[serde(default)]
    pub domain_type: DomainType,

    /// Compose service receiving the traffic
    #[serde(default)]
    pub service_name: Option<String>,
}

impl DomainBinding {
    /// Path prefix matched by the routers, if any
    pub(crate) fn path_prefix(&self) -> Option<&str> {
        self.path.as_deref().filter(|path| *path != "/")
    }

    /// Prefix to add, when it differs from the matched path
    pub(crate) fn added_prefix(&self) -> Option<&str> {
        self.internal_path
            .as_deref()
            .filter(|internal| *internal != "/" && Some(*internal) != self.path.as_deref())
    }

    /// Prefix to strip, if stripping applies
    pub(crate) fn stripped_prefix(&self) -> Option<&str> {
        if self.strip_path {
            self.path_prefix()
        } else {
            None
        }
    }
}

/// Anything receiving traffic through its own routing document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingOwner {
    /// Stable name; the document key and the backend host name
    pub app_name: String,

    #[serde(default)]
    pub server_id: Option<String>,

    /// Active redirect rules, attached to every router of the owner
    #[serde(default)]
    pub redirects: Vec<RedirectRule>,

    #[serde(default)]
    pub security: Vec<SecurityRule>,

    /// Naming of compose backends
    #[serde(default)]
    pub compose_kind: ComposeKind,
}

impl RoutingOwner {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn target(&self) -> ExecTarget {
        ExecTarget::from_server_id(self.server_id.as_deref())
    }

    pub(crate) fn validate(&self) -> Result<(), DeckhandError> {
        if self.app_name.is_empty() || self.app_name == MIDDLEWARES_DOCUMENT {
            return Err(DeckhandError::ValidationError(format!(
                "invalid routing owner name {:?}",
                self.app_name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPoint {
    Web,
    WebSecure,
}

/// Router of a binding on one entry point
fn build_router(owner: &RoutingOwner, binding: &DomainBinding, entry: EntryPoint) -> Router {
    let key = binding.unique_config_key;
    let mut rule = format!("Host(`{}`)", binding.host);
    if let Some(path) = binding.path_prefix() {
        rule.push_str(&format!(" && PathPrefix(`{}`)", path));
    }

    let mut middlewares = Vec::new();
    if entry == EntryPoint::Web && binding.https {
        middlewares.push(REDIRECT_TO_HTTPS.to_string());
    } else {
        if binding.added_prefix().is_some() {
            middlewares.push(names::add_prefix_name(&owner.app_name, key));
        }
        if binding.stripped_prefix().is_some() {
            middlewares.push(names::strip_prefix_name(&owner.app_name, key));
        }

        // Redirect and auth middlewares of previews belong to the base application
        let base = match binding.domain_type {
            DomainType::Preview => names::preview_base_name(&owner.app_name),
            _ => owner.app_name.as_str(),
        };
        for redirect in &owner.redirects {
            middlewares.push(names::redirect_name(base, redirect.unique_config_key));
        }
        if !owner.security.is_empty() {
            middlewares.push(names::auth_name(base));
        }
    }

    let tls = match (entry, binding.certificate_type) {
        (EntryPoint::WebSecure, CertificateMode::Letsencrypt) => {
            Some(RouterTls::resolver(names::LETSENCRYPT_RESOLVER))
        }
        (EntryPoint::WebSecure, CertificateMode::Custom) => binding
            .custom_cert_resolver
            .as_ref()
            .map(|resolver| RouterTls::resolver(resolver.as_str())),
        _ => None,
    };

    Router {
        rule,
        service: names::service_name(&owner.app_name, key),
        middlewares,
        entry_points: vec![match entry {
            EntryPoint::Web => WEB_ENTRYPOINT.to_string(),
            EntryPoint::WebSecure => WEBSECURE_ENTRYPOINT.to_string(),
        }],
        tls,
        ..Default::default()
    }
}

/// Backend service of a binding
fn build_service(owner: &RoutingOwner, binding: &DomainBinding) -> Result<Service, DeckhandError> {
    let host = match binding.domain_type {
        DomainType::Compose => {
            let service = binding.service_name.as_deref().ok_or_else(|| {
                DeckhandError::ValidationError(
                    "Service name is required for compose domains".to_string(),
                )
            })?;
            match owner.compose_kind {
                ComposeKind::DockerCompose => format!("{}-{}-1", owner.app_name, service),
                ComposeKind::Stack => format!("{}_{}", owner.app_name, service),
            }
        }
        DomainType::Application | DomainType::Preview => owner.app_name.clone(),
    };
    Ok(Service::single(format!("http://{}:{}", host, binding.port)))
}

/// Set or clear the path middlewares of a binding in the shared document
///
/// Returns whether the document changed.
fn apply_path_middlewares(shared: &mut FileConfig, owner: &str, binding: &DomainBinding) -> bool {
    let key = binding.unique_config_key;
    let middlewares = &mut shared.http.middlewares;
    let before = middlewares.clone();

    let add_name = names::add_prefix_name(owner, key);
    match binding.added_prefix() {
        Some(prefix) => {
            middlewares.insert(add_name, Middleware::add_prefix(prefix));
        }
        None => {
            middlewares.remove(&add_name);
        }
    }

    let strip_name = names::strip_prefix_name(owner, key);
    match binding.stripped_prefix() {
        Some(prefix) => {
            middlewares.insert(strip_name, Middleware::strip_prefix(prefix));
        }
        None => {
            middlewares.remove(&strip_name);
        }
    }

    *middlewares != before
}

fn remove_path_middlewares(shared: &mut FileConfig, owner: &str, key: u32) -> bool {
    let middlewares = &mut shared.http.middlewares;
    let add = middlewares.remove(&names::add_prefix_name(owner, key)).is_some();
    let strip = middlewares.remove(&names::strip_prefix_name(owner, key)).is_some();
    add || strip
}

impl Reconciler {
    /// Create or replace the routers and service of a binding
    pub async fn upsert_domain(
        &self,
        owner: &RoutingOwner,
        binding: &DomainBinding,
    ) -> Result<(), DeckhandError> {
        owner.validate()?;
        let service = build_service(owner, binding)?;
        let target = owner.target();
        let key = binding.unique_config_key;

        let _shared_lock = self.locks.lock(&target, MIDDLEWARES_DOCUMENT).await;
        let _owner_lock = self.locks.lock(&target, &owner.app_name).await;

        let mut config = self.store.load(&target, &owner.app_name).await?;
        let routers = &mut config.http.routers;
        routers.insert(
            names::router_name(&owner.app_name, key),
            build_router(owner, binding, EntryPoint::Web),
        );
        let secure_name = names::secure_router_name(&owner.app_name, key);
        if binding.https {
            routers.insert(secure_name, build_router(owner, binding, EntryPoint::WebSecure));
        } else {
            routers.remove(&secure_name);
        }
        config
            .http
            .services
            .insert(names::service_name(&owner.app_name, key), service);

        let mut shared = self.store.load(&target, MIDDLEWARES_DOCUMENT).await?;
        if apply_path_middlewares(&mut shared, &owner.app_name, binding) {
            self.store.persist(&target, MIDDLEWARES_DOCUMENT, &shared).await?;
        }

        self.store.persist(&target, &owner.app_name, &config).await?;
        info!("Routed {} to {} (key {})", binding.host, owner.app_name, key);
        Ok(())
    }

    /// Drop the routers and service of a binding, deleting the document when no router is left
    pub async fn remove_domain(&self, owner: &RoutingOwner, key: u32) -> Result<(), DeckhandError> {
        owner.validate()?;
        let target = owner.target();

        let _shared_lock = self.locks.lock(&target, MIDDLEWARES_DOCUMENT).await;
        let _owner_lock = self.locks.lock(&target, &owner.app_name).await;

        let mut config = self.store.load(&target, &owner.app_name).await?;
        config.http.routers.remove(&names::router_name(&owner.app_name, key));
        config
            .http
            .routers
            .remove(&names::secure_router_name(&owner.app_name, key));
        config
            .http
            .services
            .remove(&names::service_name(&owner.app_name, key));

        let mut shared = self.store.load(&target, MIDDLEWARES_DOCUMENT).await?;
        if remove_path_middlewares(&mut shared, &owner.app_name, key) {
            self.store.persist(&target, MIDDLEWARES_DOCUMENT, &shared).await?;
        }

        if config.http.routers.is_empty() {
            self.store.remove(&target, &owner.app_name).await?;
            info!("Removed last domain of {} (key {}), routing document deleted", owner.app_name, key);
        } else {
            self.store.persist(&target, &owner.app_name, &config).await?;
            info!("Removed domain {} of {}", key, owner.app_name);
        }
        Ok(())
    }
}

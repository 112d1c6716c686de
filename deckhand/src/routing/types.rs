//! Traefik dynamic configuration documents
//!
//! Only the parts of the file provider format deckhand writes are typed; any other
//! key found in a document is carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One dynamic configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub routers: BTreeMap<String, Router>,

    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub middlewares: BTreeMap<String, Middleware>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// An HTTP router
///
/// Routers deckhand does not own may carry any other Traefik option in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    #[serde(default)]
    pub rule: String,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub middlewares: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_resolver: Option<String>,

    /// `domains`, `options` and anything else set by hand
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl RouterTls {
    pub fn resolver(name: impl Into<String>) -> Self {
        Self {
            cert_resolver: Some(name.into()),
            ..Default::default()
        }
    }
}

/// An HTTP service
///
/// Deckhand only writes load balancers; `weighted`, `mirroring` and `failover`
/// services survive in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Service {
    /// Service forwarding to one backend URL
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            load_balancer: Some(LoadBalancer {
                servers: vec![ServerUrl {
                    url: url.into(),
                    extra: BTreeMap::new(),
                }],
                pass_host_header: Some(true),
                extra: BTreeMap::new(),
            }),
            extra: BTreeMap::new(),
        }
    }

    /// Backend URLs of a load balancer service
    pub fn server_urls(&self) -> Vec<&str> {
        self.load_balancer
            .iter()
            .flat_map(|lb| lb.servers.iter().map(|server| server.url.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    #[serde(default)]
    pub servers: Vec<ServerUrl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_host_header: Option<bool>,

    /// `healthCheck`, `sticky`, `serversTransport` and the like
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUrl {
    pub url: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A middleware; exactly one of the typed fields is set for the ones deckhand writes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Middleware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_scheme: Option<RedirectScheme>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_regex: Option<RedirectRegex>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<StripPrefix>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_prefix: Option<AddPrefix>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Middleware {
    pub fn redirect_scheme(scheme: &str, permanent: bool) -> Self {
        Self {
            redirect_scheme: Some(RedirectScheme {
                scheme: scheme.to_string(),
                permanent,
                extra: BTreeMap::new(),
            }),
            ..Default::default()
        }
    }

    pub fn redirect_regex(regex: &str, replacement: &str, permanent: bool) -> Self {
        Self {
            redirect_regex: Some(RedirectRegex {
                regex: regex.to_string(),
                replacement: replacement.to_string(),
                permanent,
            }),
            ..Default::default()
        }
    }

    pub fn strip_prefix(prefix: &str) -> Self {
        Self {
            strip_prefix: Some(StripPrefix {
                prefixes: vec![prefix.to_string()],
                force_slash: false,
            }),
            ..Default::default()
        }
    }

    pub fn add_prefix(prefix: &str) -> Self {
        Self {
            add_prefix: Some(AddPrefix {
                prefix: prefix.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn basic_auth(users: Vec<String>) -> Self {
        Self {
            basic_auth: Some(BasicAuth {
                remove_header: true,
                users,
                extra: BTreeMap::new(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectScheme {
    pub scheme: String,
    #[serde(default)]
    pub permanent: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectRegex {
    pub regex: String,
    pub replacement: String,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripPrefix {
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub force_slash: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPrefix {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    #[serde(default)]
    pub remove_header: bool,
    #[serde(default)]
    pub users: Vec<String>,
    /// `realm`, `usersFile` and other options set by hand
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

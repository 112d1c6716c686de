//! Canonical names of routing entries

use std::sync::LazyLock;

use regex::Regex;

/// Middleware upgrading plain HTTP, provisioned in the shared document
pub const REDIRECT_TO_HTTPS: &str = "redirect-to-https";

/// Resolver used for `letsencrypt` certificates
pub const LETSENCRYPT_RESOLVER: &str = "letsencrypt";

pub const WEB_ENTRYPOINT: &str = "web";
pub const WEBSECURE_ENTRYPOINT: &str = "websecure";

static PREVIEW_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^preview-(.+)-[^-]+$").ok());

pub fn service_name(owner: &str, key: u32) -> String {
    format!("{}-service-{}", owner, key)
}

pub fn router_name(owner: &str, key: u32) -> String {
    format!("{}-router-{}", owner, key)
}

pub fn secure_router_name(owner: &str, key: u32) -> String {
    format!("{}-router-websecure-{}", owner, key)
}

pub fn add_prefix_name(owner: &str, key: u32) -> String {
    format!("addprefix-{}-{}", owner, key)
}

pub fn strip_prefix_name(owner: &str, key: u32) -> String {
    format!("stripprefix-{}-{}", owner, key)
}

pub fn redirect_name(owner: &str, key: u32) -> String {
    format!("redirect-{}-{}", owner, key)
}

pub fn auth_name(owner: &str) -> String {
    format!("auth-{}", owner)
}

/// Document name of a proxy binding
pub fn proxy_document(proxy_id: &str) -> String {
    format!("proxy-{}", proxy_id)
}

/// Name of the application a preview deployment was created from
///
/// Preview names are `preview-{base}-{suffix}`; anything else is returned as is.
pub fn preview_base_name(preview_name: &str) -> &str {
    PREVIEW_NAME
        .as_ref()
        .and_then(|pattern| pattern.captures(preview_name))
        .and_then(|captures| captures.get(1))
        .map(|base| base.as_str())
        .unwrap_or(preview_name)
}

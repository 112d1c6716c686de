//! Redirect, basic auth and default middlewares in the shared document

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::DeckhandError;
use crate::exec::ExecTarget;
use crate::routing::domain::RoutingOwner;
use crate::routing::names::{self, REDIRECT_TO_HTTPS};
use crate::routing::types::{FileConfig, Middleware};
use crate::routing::Reconciler;
use crate::storage::layout::MIDDLEWARES_DOCUMENT;

/// Regex redirect of an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub unique_config_key: u32,
    pub regex: String,
    pub replacement: String,
    #[serde(default)]
    pub permanent: bool,
}

impl RedirectRule {
    pub fn new(unique_config_key: u32, regex: &str, replacement: &str, permanent: bool) -> Self {
        Self {
            unique_config_key,
            regex: regex.to_string(),
            replacement: replacement.to_string(),
            permanent,
        }
    }
}

/// Basic auth user of an owner; the password is already hashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    pub username: String,
    pub password_hash: String,
}

impl SecurityRule {
    pub fn new(username: &str, password_hash: &str) -> Self {
        Self {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        }
    }

    /// Entry of a basicAuth user list
    pub fn credential(&self) -> String {
        format!("{}:{}", self.username, self.password_hash)
    }
}

/// Position of a middleware in a router's list
fn rank(name: &str) -> u8 {
    if name.starts_with("addprefix-") {
        0
    } else if name.starts_with("stripprefix-") {
        1
    } else if name.starts_with("redirect-") {
        2
    } else if name.starts_with("auth-") {
        3
    } else {
        4
    }
}

/// Add a middleware to every router not reserved for the HTTPS upgrade
///
/// Returns whether any router changed.
pub(crate) fn attach(config: &mut FileConfig, name: &str) -> bool {
    let mut changed = false;
    for router in config.http.routers.values_mut() {
        if router.middlewares.iter().any(|m| m == REDIRECT_TO_HTTPS)
            || router.middlewares.iter().any(|m| m == name)
        {
            continue;
        }
        router.middlewares.push(name.to_string());
        router.middlewares.sort_by_key(|m| rank(m));
        changed = true;
    }
    changed
}

/// Remove a middleware from every router
pub(crate) fn detach(config: &mut FileConfig, name: &str) -> bool {
    let mut changed = false;
    for router in config.http.routers.values_mut() {
        let before = router.middlewares.len();
        router.middlewares.retain(|m| m != name);
        changed |= router.middlewares.len() != before;
    }
    changed
}

/// Add `rule` to a basicAuth user list, replacing a user of the same name
fn with_user(mut users: Vec<String>, rule: &SecurityRule) -> Vec<String> {
    users.retain(|user| user_name(user) != rule.username);
    users.push(rule.credential());
    users
}

fn user_name(credential: &str) -> &str {
    credential.split_once(':').map(|(user, _)| user).unwrap_or(credential)
}

impl Reconciler {
    /// Provision `redirect-to-https` in the shared document
    pub async fn create_default_middlewares(&self, target: &ExecTarget) -> Result<(), DeckhandError> {
        let _shared_lock = self.locks.lock(target, MIDDLEWARES_DOCUMENT).await;

        let mut shared = self.store.load(target, MIDDLEWARES_DOCUMENT).await?;
        if shared.http.middlewares.contains_key(REDIRECT_TO_HTTPS) {
            debug!("Default middlewares already present on {}", target);
            return Ok(());
        }

        shared.http.middlewares.insert(
            REDIRECT_TO_HTTPS.to_string(),
            Middleware::redirect_scheme("https", true),
        );
        self.store.persist(target, MIDDLEWARES_DOCUMENT, &shared).await?;
        info!("Created default middlewares on {}", target);
        Ok(())
    }

    /// Provision a redirect and attach it to the owner's routers
    pub async fn create_redirect(
        &self,
        owner: &RoutingOwner,
        rule: &RedirectRule,
    ) -> Result<(), DeckhandError> {
        self.put_redirect(owner, rule).await?;
        info!("Created redirect {} for {}", rule.unique_config_key, owner.app_name);
        Ok(())
    }

    /// Replace the definition of a redirect
    pub async fn update_redirect(
        &self,
        owner: &RoutingOwner,
        rule: &RedirectRule,
    ) -> Result<(), DeckhandError> {
        self.put_redirect(owner, rule).await?;
        info!("Updated redirect {} for {}", rule.unique_config_key, owner.app_name);
        Ok(())
    }

    async fn put_redirect(&self, owner: &RoutingOwner, rule: &RedirectRule) -> Result<(), DeckhandError> {
        owner.validate()?;
        let target = owner.target();
        let name = names::redirect_name(&owner.app_name, rule.unique_config_key);

        let _shared_lock = self.locks.lock(&target, MIDDLEWARES_DOCUMENT).await;
        let _owner_lock = self.locks.lock(&target, &owner.app_name).await;

        let mut shared = self.store.load(&target, MIDDLEWARES_DOCUMENT).await?;
        shared.http.middlewares.insert(
            name.clone(),
            Middleware::redirect_regex(&rule.regex, &rule.replacement, rule.permanent),
        );
        self.store.persist(&target, MIDDLEWARES_DOCUMENT, &shared).await?;

        self.update_owner_routers(&target, &owner.app_name, |config| attach(config, &name))
            .await
    }

    /// Delete a redirect and detach it from the owner's routers
    pub async fn remove_redirect(&self, owner: &RoutingOwner, key: u32) -> Result<(), DeckhandError> {
        owner.validate()?;
        let target = owner.target();
        let name = names::redirect_name(&owner.app_name, key);

        let _shared_lock = self.locks.lock(&target, MIDDLEWARES_DOCUMENT).await;
        let _owner_lock = self.locks.lock(&target, &owner.app_name).await;

        let mut shared = self.store.load(&target, MIDDLEWARES_DOCUMENT).await?;
        if shared.http.middlewares.remove(&name).is_some() {
            self.store.persist(&target, MIDDLEWARES_DOCUMENT, &shared).await?;
        }

        self.update_owner_routers(&target, &owner.app_name, |config| detach(config, &name))
            .await?;
        info!("Removed redirect {} for {}", key, owner.app_name);
        Ok(())
    }

    /// Add a user to the owner's basic auth middleware
    pub async fn create_security(
        &self,
        owner: &RoutingOwner,
        rule: &SecurityRule,
    ) -> Result<(), DeckhandError> {
        self.change_users(owner, None, Some(rule)).await?;
        info!("Added basic auth user {} to {}", rule.username, owner.app_name);
        Ok(())
    }

    /// Replace a user of the owner's basic auth middleware
    pub async fn update_security(
        &self,
        owner: &RoutingOwner,
        previous_username: &str,
        rule: &SecurityRule,
    ) -> Result<(), DeckhandError> {
        self.change_users(owner, Some(previous_username), Some(rule))
            .await?;
        info!("Updated basic auth user {} of {}", rule.username, owner.app_name);
        Ok(())
    }

    /// Remove a user; the middleware goes away with its last user
    pub async fn remove_security(&self, owner: &RoutingOwner, username: &str) -> Result<(), DeckhandError> {
        self.change_users(owner, Some(username), None).await?;
        info!("Removed basic auth user {} from {}", username, owner.app_name);
        Ok(())
    }

    async fn change_users(
        &self,
        owner: &RoutingOwner,
        remove: Option<&str>,
        add: Option<&SecurityRule>,
    ) -> Result<(), DeckhandError> {
        owner.validate()?;
        let target = owner.target();
        let name = names::auth_name(&owner.app_name);

        let _shared_lock = self.locks.lock(&target, MIDDLEWARES_DOCUMENT).await;
        let _owner_lock = self.locks.lock(&target, &owner.app_name).await;

        let mut shared = self.store.load(&target, MIDDLEWARES_DOCUMENT).await?;
        let before = shared.http.middlewares.get(&name).cloned();
        let mut users = before
            .as_ref()
            .and_then(|m| m.basic_auth.as_ref())
            .map(|auth| auth.users.clone())
            .unwrap_or_default();
        if let Some(username) = remove {
            users.retain(|user| user_name(user) != username);
        }
        if let Some(rule) = add {
            users = with_user(users, rule);
        }

        let present = !users.is_empty();
        if present {
            shared
                .http
                .middlewares
                .insert(name.clone(), Middleware::basic_auth(users));
        } else {
            shared.http.middlewares.remove(&name);
        }
        if shared.http.middlewares.get(&name) != before.as_ref() {
            self.store.persist(&target, MIDDLEWARES_DOCUMENT, &shared).await?;
        }

        self.update_owner_routers(&target, &owner.app_name, |config| {
            if present {
                attach(config, &name)
            } else {
                detach(config, &name)
            }
        })
        .await
    }

    /// Apply `change` to an owner document that has routers, persisting on change
    async fn update_owner_routers<F>(
        &self,
        target: &ExecTarget,
        owner_name: &str,
        change: F,
    ) -> Result<(), DeckhandError>
    where
        F: FnOnce(&mut FileConfig) -> bool,
    {
        let mut config = self.store.load(target, owner_name).await?;
        if config.http.routers.is_empty() {
            return Ok(());
        }
        if change(&mut config) {
            self.store.persist(target, owner_name, &config).await?;
        }
        Ok(())
    }
}

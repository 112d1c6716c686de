//! Routing reconciler tests

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use deckhand::errors::DeckhandError;
use deckhand::exec::{ExecTarget, ShellDispatcher};
use deckhand::routing::names::{self, REDIRECT_TO_HTTPS};
use deckhand::routing::{
    CertificateMode, DomainBinding, DomainType, FileConfig, RedirectRule, RoutingOwner,
    SecurityRule,
};

use crate::common::{reconciler, LoopbackDispatcher};

fn binding(key: u32, https: bool) -> DomainBinding {
    DomainBinding {
        host: "blog.example.com".to_string(),
        path: Some("/".to_string()),
        internal_path: None,
        strip_path: false,
        port: 3000,
        https,
        certificate_type: CertificateMode::Letsencrypt,
        custom_cert_resolver: None,
        unique_config_key: key,
        domain_type: DomainType::Application,
        service_name: None,
    }
}

fn local_document(root: &TempDir, name: &str) -> PathBuf {
    root.path()
        .join("local/traefik/dynamic")
        .join(format!("{}.yml", name))
}

fn remote_document(root: &TempDir, name: &str) -> PathBuf {
    root.path()
        .join("remote/traefik/dynamic")
        .join(format!("{}.yml", name))
}

fn local_reconciler(root: &TempDir) -> deckhand::routing::Reconciler {
    reconciler(root, Arc::new(ShellDispatcher::new(Default::default())))
}

#[tokio::test]
async fn test_blog_scenario() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");

    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();

    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    let web = &config.http.routers["blog-router-1"];
    assert_eq!(web.rule, "Host(`blog.example.com`)");
    assert_eq!(web.entry_points, vec!["web"]);
    assert_eq!(web.middlewares, vec![REDIRECT_TO_HTTPS]);
    assert_eq!(web.service, "blog-service-1");
    assert!(web.tls.is_none());

    let secure = &config.http.routers["blog-router-websecure-1"];
    assert_eq!(secure.entry_points, vec!["websecure"]);
    assert_eq!(
        secure.tls.as_ref().and_then(|tls| tls.cert_resolver.as_deref()),
        Some("letsencrypt")
    );

    let service = &config.http.services["blog-service-1"];
    assert_eq!(service.server_urls(), vec!["http://blog:3000"]);
    assert_eq!(
        service.load_balancer.as_ref().and_then(|lb| lb.pass_host_header),
        Some(true)
    );

    let raw = std::fs::read_to_string(local_document(&root, "blog")).unwrap();
    assert!(raw.contains("entryPoints:"));
    assert!(raw.contains("certResolver: letsencrypt"));
    assert!(raw.contains("passHostHeader: true"));
}

#[tokio::test]
async fn test_router_and_service_keys_follow_bindings() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");

    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();
    reconciler.upsert_domain(&owner, &binding(2, false)).await.unwrap();
    reconciler.upsert_domain(&owner, &binding(3, true)).await.unwrap();
    reconciler.remove_domain(&owner, 2).await.unwrap();
    reconciler.upsert_domain(&owner, &binding(1, false)).await.unwrap();
    reconciler.upsert_domain(&owner, &binding(4, true)).await.unwrap();
    reconciler.remove_domain(&owner, 4).await.unwrap();

    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    let routers: BTreeSet<&str> = config.http.routers.keys().map(String::as_str).collect();
    let services: BTreeSet<&str> = config.http.services.keys().map(String::as_str).collect();

    assert_eq!(
        routers,
        BTreeSet::from(["blog-router-1", "blog-router-3", "blog-router-websecure-3"])
    );
    assert_eq!(services, BTreeSet::from(["blog-service-1", "blog-service-3"]));
    for router in config.http.routers.values() {
        assert!(config.http.services.contains_key(&router.service));
    }
}

#[tokio::test]
async fn test_removing_last_domain_deletes_document() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");

    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();
    reconciler.upsert_domain(&owner, &binding(2, false)).await.unwrap();
    reconciler.remove_domain(&owner, 1).await.unwrap();
    assert!(local_document(&root, "blog").exists());

    reconciler.remove_domain(&owner, 2).await.unwrap();
    assert!(!local_document(&root, "blog").exists());
    assert!(reconciler
        .read_document(&ExecTarget::Local, "blog")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap(),
        FileConfig::default()
    );
}

#[tokio::test]
async fn test_https_toggle_is_idempotent() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");

    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();
    let original = std::fs::read(local_document(&root, "blog")).unwrap();

    reconciler.upsert_domain(&owner, &binding(1, false)).await.unwrap();
    let plain = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert!(!plain.http.routers.contains_key("blog-router-websecure-1"));
    assert!(plain.http.routers["blog-router-1"].middlewares.is_empty());

    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();
    let restored = std::fs::read(local_document(&root, "blog")).unwrap();
    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_path_middlewares_live_in_shared_document() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");
    let api = DomainBinding {
        path: Some("/api".to_string()),
        strip_path: true,
        internal_path: Some("/v1".to_string()),
        ..binding(1, true)
    };

    reconciler.upsert_domain(&owner, &api).await.unwrap();
    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert_eq!(
        config.http.routers["blog-router-websecure-1"].middlewares,
        vec!["addprefix-blog-1", "stripprefix-blog-1"]
    );
    assert!(config.http.middlewares.is_empty());

    let shared = reconciler
        .load_document(&ExecTarget::Local, "middlewares")
        .await
        .unwrap();
    let strip = shared.http.middlewares["stripprefix-blog-1"]
        .strip_prefix
        .as_ref()
        .unwrap();
    assert_eq!(strip.prefixes, vec!["/api"]);
    let add = shared.http.middlewares["addprefix-blog-1"]
        .add_prefix
        .as_ref()
        .unwrap();
    assert_eq!(add.prefix, "/v1");

    reconciler.remove_domain(&owner, 1).await.unwrap();
    let shared = reconciler
        .load_document(&ExecTarget::Local, "middlewares")
        .await
        .unwrap();
    assert!(!shared.http.middlewares.contains_key("stripprefix-blog-1"));
    assert!(!shared.http.middlewares.contains_key("addprefix-blog-1"));
}

#[tokio::test]
async fn test_security_accumulates_and_tears_down() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("shop");
    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();

    reconciler
        .create_security(&owner, &SecurityRule::new("ana", "$apr1$a"))
        .await
        .unwrap();
    reconciler
        .create_security(&owner, &SecurityRule::new("ben", "$apr1$b"))
        .await
        .unwrap();

    let users = |config: &FileConfig| -> Option<Vec<String>> {
        config
            .http
            .middlewares
            .get("auth-shop")
            .and_then(|m| m.basic_auth.as_ref())
            .map(|auth| auth.users.clone())
    };

    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    assert_eq!(
        users(&shared),
        Some(vec!["ana:$apr1$a".to_string(), "ben:$apr1$b".to_string()])
    );
    let config = reconciler.load_document(&ExecTarget::Local, "shop").await.unwrap();
    assert_eq!(config.http.routers["shop-router-websecure-1"].middlewares, vec!["auth-shop"]);
    assert_eq!(config.http.routers["shop-router-1"].middlewares, vec![REDIRECT_TO_HTTPS]);

    reconciler.remove_security(&owner, "ana").await.unwrap();
    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    assert_eq!(users(&shared), Some(vec!["ben:$apr1$b".to_string()]));

    reconciler.remove_security(&owner, "ben").await.unwrap();
    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    assert!(users(&shared).is_none());
    let config = reconciler.load_document(&ExecTarget::Local, "shop").await.unwrap();
    for router in config.http.routers.values() {
        assert!(!router.middlewares.iter().any(|m| m == "auth-shop"));
    }
}

#[tokio::test]
async fn test_update_security_renames_user() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("shop");

    reconciler
        .create_security(&owner, &SecurityRule::new("ana", "$apr1$a"))
        .await
        .unwrap();
    reconciler
        .update_security(&owner, "ana", &SecurityRule::new("anna", "$apr1$c"))
        .await
        .unwrap();

    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    let auth = shared.http.middlewares["auth-shop"].basic_auth.as_ref().unwrap();
    assert_eq!(auth.users, vec!["anna:$apr1$c"]);
    assert!(auth.remove_header);
    // No owner document yet, so nothing to attach to
    assert!(!local_document(&root, "shop").exists());
}

#[tokio::test]
async fn test_redirect_lifecycle() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");
    reconciler.upsert_domain(&owner, &binding(1, true)).await.unwrap();

    let rule = RedirectRule::new(7, "^https?://www\\.(.*)", "https://${1}", true);
    reconciler.create_redirect(&owner, &rule).await.unwrap();

    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    let regex = shared.http.middlewares["redirect-blog-7"]
        .redirect_regex
        .as_ref()
        .unwrap();
    assert_eq!(regex.replacement, "https://${1}");
    assert!(regex.permanent);
    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert_eq!(config.http.routers["blog-router-websecure-1"].middlewares, vec!["redirect-blog-7"]);
    assert_eq!(config.http.routers["blog-router-1"].middlewares, vec![REDIRECT_TO_HTTPS]);

    let updated = RedirectRule::new(7, "^/old/(.*)", "/new/${1}", false);
    reconciler.update_redirect(&owner, &updated).await.unwrap();
    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    let regex = shared.http.middlewares["redirect-blog-7"]
        .redirect_regex
        .as_ref()
        .unwrap();
    assert_eq!(regex.regex, "^/old/(.*)");
    assert!(!regex.permanent);

    reconciler.remove_redirect(&owner, 7).await.unwrap();
    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    assert!(!shared.http.middlewares.contains_key("redirect-blog-7"));
    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert!(config.http.routers["blog-router-websecure-1"].middlewares.is_empty());
}

#[tokio::test]
async fn test_preview_uses_base_owner_middlewares() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner {
        redirects: vec![RedirectRule::new(2, "^/a", "/b", true)],
        security: vec![SecurityRule::new("ana", "$apr1$a")],
        ..RoutingOwner::new("preview-blog-ab12cd")
    };
    let preview = DomainBinding {
        host: "preview-blog-ab12cd.traefik.me".to_string(),
        domain_type: DomainType::Preview,
        ..binding(1, false)
    };

    reconciler.upsert_domain(&owner, &preview).await.unwrap();

    let config = reconciler
        .load_document(&ExecTarget::Local, "preview-blog-ab12cd")
        .await
        .unwrap();
    let router = &config.http.routers["preview-blog-ab12cd-router-1"];
    assert_eq!(router.middlewares, vec!["redirect-blog-2", "auth-blog"]);
    assert_eq!(router.service, "preview-blog-ab12cd-service-1");
    assert_eq!(names::auth_name(names::preview_base_name("preview-blog-ab12cd")), "auth-blog");
}

#[tokio::test]
async fn test_default_middlewares_are_created_once() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);

    reconciler
        .create_default_middlewares(&ExecTarget::Local)
        .await
        .unwrap();
    let first = std::fs::read(local_document(&root, "middlewares")).unwrap();
    reconciler
        .create_default_middlewares(&ExecTarget::Local)
        .await
        .unwrap();
    let second = std::fs::read(local_document(&root, "middlewares")).unwrap();
    assert_eq!(first, second);

    let shared = reconciler.load_document(&ExecTarget::Local, "middlewares").await.unwrap();
    let scheme = shared.http.middlewares[REDIRECT_TO_HTTPS]
        .redirect_scheme
        .as_ref()
        .unwrap();
    assert_eq!(scheme.scheme, "https");
    assert!(scheme.permanent);
}

#[tokio::test]
async fn test_remote_documents_match_local_bytes() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(LoopbackDispatcher::new());
    let reconciler = reconciler(&root, dispatcher.clone());

    let local = RoutingOwner::new("blog");
    let remote = RoutingOwner {
        server_id: Some("srv-1".to_string()),
        ..RoutingOwner::new("blog")
    };
    let api = DomainBinding {
        path: Some("/api".to_string()),
        strip_path: true,
        ..binding(2, true)
    };
    for owner in [&local, &remote] {
        reconciler.upsert_domain(owner, &binding(1, true)).await.unwrap();
        reconciler.upsert_domain(owner, &api).await.unwrap();
        reconciler
            .create_security(owner, &SecurityRule::new("ana", "$apr1$a'quoted\""))
            .await
            .unwrap();
    }

    for name in ["blog", "middlewares"] {
        let local_bytes = std::fs::read(local_document(&root, name)).unwrap();
        let remote_bytes = std::fs::read(remote_document(&root, name)).unwrap();
        assert_eq!(local_bytes, remote_bytes, "document {} differs", name);
    }

    let commands = dispatcher.remote_commands();
    assert!(!commands.is_empty());
    for command in commands.iter().filter(|c| c.starts_with("mkdir -p")) {
        assert!(command.contains("base64 -d >"));
        assert!(command.contains("&& mv "));
        assert!(!command.contains("Host(`"));
    }

    reconciler.remove_domain(&remote, 1).await.unwrap();
    reconciler.remove_domain(&remote, 2).await.unwrap();
    assert!(!remote_document(&root, "blog").exists());
    assert!(dispatcher
        .remote_commands()
        .iter()
        .any(|c| c.starts_with("rm -f")));
}

#[tokio::test]
async fn test_concurrent_upserts_keep_every_binding() {
    let root = TempDir::new().unwrap();
    let reconciler = Arc::new(local_reconciler(&root));
    let owner = RoutingOwner::new("blog");

    let mut handles = Vec::new();
    for key in 1..=12 {
        let reconciler = reconciler.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            reconciler
                .upsert_domain(&owner, &binding(key, key % 2 == 0))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert_eq!(config.http.services.len(), 12);
    assert_eq!(config.http.routers.len(), 12 + 6);
}

#[tokio::test]
async fn test_shared_document_name_is_not_an_owner() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let result = reconciler
        .upsert_domain(&RoutingOwner::new("middlewares"), &binding(1, true))
        .await;
    assert!(matches!(result, Err(DeckhandError::ValidationError(_))));
}

#[tokio::test]
async fn test_compose_domain_requires_service_name() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let compose = DomainBinding {
        domain_type: DomainType::Compose,
        ..binding(1, false)
    };
    let result = reconciler
        .upsert_domain(&RoutingOwner::new("shop"), &compose)
        .await;
    assert!(matches!(result, Err(DeckhandError::ValidationError(_))));
    assert!(!local_document(&root, "shop").exists());
}

const HAND_WRITTEN: &str = r#"http:
  routers:
    custom:
      rule: Host(`example.com`)
      service: custom-svc
      entryPoints:
        - websecure
      tls:
        certResolver: le
        domains:
          - main: example.com
    canary:
      rule: Host(`canary.example.com`)
      service: split
  services:
    custom-svc:
      loadBalancer:
        servers:
          - url: http://10.0.0.5:80
        healthCheck:
          path: /health
    split:
      weighted:
        services:
          - name: custom-svc
            weight: 3
"#;

#[tokio::test]
async fn test_upsert_keeps_entries_it_does_not_own() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let owner = RoutingOwner::new("blog");

    reconciler
        .write_document(&ExecTarget::Local, "blog", HAND_WRITTEN)
        .await
        .unwrap();
    reconciler.upsert_domain(&owner, &binding(1, false)).await.unwrap();

    let written = std::fs::read_to_string(local_document(&root, "blog")).unwrap();
    assert!(written.contains("domains:"));
    assert!(written.contains("main: example.com"));
    assert!(written.contains("healthCheck:"));
    assert!(written.contains("weighted:"));

    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert!(config.http.routers.contains_key("canary"));
    assert!(config.http.routers.contains_key("blog-router-1"));
    let custom = &config.http.services["custom-svc"];
    assert_eq!(
        custom.load_balancer.as_ref().and_then(|lb| lb.pass_host_header),
        None
    );

    // Removing the owned binding leaves the hand-written routers in place
    reconciler.remove_domain(&owner, 1).await.unwrap();
    let config = reconciler.load_document(&ExecTarget::Local, "blog").await.unwrap();
    assert_eq!(
        config.http.routers.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["canary", "custom"]
    );
}

#[tokio::test]
async fn test_unparseable_document_is_left_alone() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let path = local_document(&root, "blog");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let garbage = "http:\n  routers: [unterminated\n";
    std::fs::write(&path, garbage).unwrap();

    let result = reconciler
        .upsert_domain(&RoutingOwner::new("blog"), &binding(1, false))
        .await;
    assert!(matches!(result, Err(DeckhandError::YamlError(_))));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), garbage);

    let result = reconciler.remove_domain(&RoutingOwner::new("blog"), 1).await;
    assert!(result.is_err());
    assert!(path.exists());
}

#[tokio::test]
async fn test_unparseable_shared_document_blocks_the_cycle() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let shared = local_document(&root, "middlewares");
    std::fs::create_dir_all(shared.parent().unwrap()).unwrap();
    std::fs::write(&shared, "http: [").unwrap();

    let result = reconciler
        .upsert_domain(&RoutingOwner::new("blog"), &binding(1, false))
        .await;
    assert!(result.is_err());
    assert!(!local_document(&root, "blog").exists());
}

#[tokio::test]
async fn test_write_document_stores_text_as_given() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    let edited = "# edited by hand\nhttp:\n  routers: {}\n  services: {}\n";

    reconciler
        .write_document(&ExecTarget::Local, "blog", edited)
        .await
        .unwrap();
    assert_eq!(
        reconciler
            .read_document(&ExecTarget::Local, "blog")
            .await
            .unwrap()
            .as_deref(),
        Some(edited)
    );
}

#[tokio::test]
async fn test_write_document_rejects_invalid_input() {
    let root = TempDir::new().unwrap();
    let reconciler = local_reconciler(&root);
    reconciler
        .write_document(&ExecTarget::Local, "blog", HAND_WRITTEN)
        .await
        .unwrap();

    let invalid = reconciler
        .write_document(&ExecTarget::Local, "blog", "http:\n  routers: [")
        .await;
    assert!(matches!(invalid, Err(DeckhandError::ValidationError(_))));
    assert_eq!(
        std::fs::read_to_string(local_document(&root, "blog")).unwrap(),
        HAND_WRITTEN
    );

    for name in ["", "../blog", "nested/blog"] {
        let result = reconciler
            .write_document(&ExecTarget::Local, name, HAND_WRITTEN)
            .await;
        assert!(matches!(result, Err(DeckhandError::ValidationError(_))), "{:?}", name);
    }
}

#[tokio::test]
async fn test_write_document_on_remote_host() {
    let root = TempDir::new().unwrap();
    let dispatcher = Arc::new(LoopbackDispatcher::new());
    let reconciler = reconciler(&root, dispatcher.clone());
    let target = ExecTarget::Remote("srv-1".to_string());

    reconciler
        .write_document(&target, "blog", HAND_WRITTEN)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(remote_document(&root, "blog")).unwrap(),
        HAND_WRITTEN
    );
    let commands = dispatcher.remote_commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("base64 -d >"));
    assert!(!commands[0].contains("Host(`"));
}

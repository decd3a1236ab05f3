//! Integration tests for `MultiWorkspaceProvider` construction, target
//! listing and the lazily-built manager cache.

use std::sync::Arc;

use kube_reload::kcp::{ManagerEntry, MultiWorkspaceProvider};
use kube_reload::{AppError, GlobalConfig};

use super::test_helpers::{fast_watch_config, FakeTree, KubeconfigFixture, BASE_URL};

fn org_tree() -> FakeTree {
    let tree = FakeTree::default();
    tree.set_children("root", &["shared", "org"]);
    tree.set_children("root:org", &["team"]);
    tree
}

async fn provider(fixture: &KubeconfigFixture, tree: &FakeTree) -> MultiWorkspaceProvider {
    MultiWorkspaceProvider::with_lister_factory(fixture.config(), tree.factory())
        .await
        .expect("provider")
}

#[tokio::test]
async fn targets_cover_discovered_tree() {
    let fixture = KubeconfigFixture::root();
    let tree = org_tree();
    let provider = provider(&fixture, &tree).await;

    assert_eq!(provider.default_target(), "root");
    assert_eq!(
        provider.targets(),
        vec!["root", "root:org", "root:org:team", "root:shared"]
    );
    // one listing per workspace; watchers stay idle until armed
    assert_eq!(tree.calls(), 4);
    provider.close().await;
}

#[tokio::test]
async fn default_manager_is_prebuilt_and_others_pending() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;

    assert!(matches!(provider.entry("root"), ManagerEntry::Ready(_)));
    assert!(matches!(provider.entry("root:org"), ManagerEntry::Pending));
    assert!(matches!(provider.entry("root:ghost"), ManagerEntry::Unknown));
    provider.close().await;
}

#[tokio::test]
async fn derived_manager_is_cached() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;

    let first = provider.derived_kubernetes("root:org:team").expect("manager");
    let second = provider.derived_kubernetes("root:org:team").expect("manager");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(matches!(provider.entry("root:org:team"), ManagerEntry::Ready(_)));

    assert_eq!(first.workspace(), "root:org:team");
    assert_eq!(
        first.config().cluster_url.to_string(),
        format!("{BASE_URL}/clusters/root:org:team")
    );
    assert_eq!(first.context(), "kcp-root:org:team");
    assert_eq!(
        first.kubeconfig().current_context.as_deref(),
        Some("kcp-root:org:team")
    );
    provider.close().await;
}

#[tokio::test]
async fn empty_workspace_resolves_to_default() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;

    let by_default = provider.derived_kubernetes("").expect("manager");
    let by_name = provider.derived_kubernetes("root").expect("manager");
    assert!(Arc::ptr_eq(&by_default, &by_name));
    assert_eq!(by_default.context(), "base");
    provider.close().await;
}

#[tokio::test]
async fn unknown_workspace_is_not_found() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;

    let err = provider
        .derived_kubernetes("root:ghost")
        .expect_err("unknown workspace");
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(err.to_string(), "not found: workspace root:ghost not found");
    assert!(matches!(provider.entry("root:ghost"), ManagerEntry::Unknown));
    provider.close().await;
}

#[tokio::test]
async fn existing_kubeconfig_context_is_reused() {
    let fixture = KubeconfigFixture::new(&format!("{BASE_URL}/clusters/root"), &["root:org"]);
    let provider = provider(&fixture, &org_tree()).await;

    let manager = provider.derived_kubernetes("root:org").expect("manager");
    assert_eq!(manager.context(), "extra-0");
    provider.close().await;
}

#[tokio::test]
async fn unreachable_branch_is_still_a_target() {
    let fixture = KubeconfigFixture::root();
    let tree = org_tree();
    tree.fail("root:org");
    let provider = provider(&fixture, &tree).await;

    assert_eq!(provider.targets(), vec!["root", "root:org", "root:shared"]);
    provider.close().await;
}

#[tokio::test]
async fn unavailable_api_falls_back_to_kubeconfig() {
    let fixture = KubeconfigFixture::new(
        &format!("{BASE_URL}/clusters/root"),
        &["root:b", "root:a", "root:a"],
    );
    let tree = FakeTree::default();
    tree.fail("root");
    let provider = provider(&fixture, &tree).await;

    assert_eq!(provider.targets(), vec!["root", "root:a", "root:b"]);
    assert!(provider.derived_kubernetes("root:a").is_ok());
    provider.close().await;
}

#[tokio::test]
async fn server_without_workspace_is_fatal() {
    let fixture = KubeconfigFixture::new(BASE_URL, &[]);
    let err = MultiWorkspaceProvider::with_lister_factory(fixture.config(), FakeTree::default().factory())
        .await
        .err()
        .expect("construction must fail");
    assert!(matches!(err, AppError::Kubeconfig(_)), "got {err:?}");
}

#[tokio::test]
async fn missing_kubeconfig_is_fatal() {
    let config = Arc::new(GlobalConfig {
        kubeconfig: Some("/nonexistent/kube/config".into()),
        context: None,
        watch: fast_watch_config(),
    });
    let result = MultiWorkspaceProvider::with_lister_factory(config, FakeTree::default().factory()).await;
    assert!(matches!(result, Err(AppError::Kubeconfig(_))));
}

#[tokio::test]
async fn unknown_context_is_fatal() {
    let fixture = KubeconfigFixture::root();
    let config = Arc::new(GlobalConfig {
        kubeconfig: Some(fixture.path.clone()),
        context: Some("ghost".into()),
        watch: fast_watch_config(),
    });
    let result = MultiWorkspaceProvider::with_lister_factory(config, FakeTree::default().factory()).await;
    assert!(matches!(result, Err(AppError::Kubeconfig(_))));
}

#[tokio::test]
async fn reset_rediscovers_and_rebuilds_cache() {
    let fixture = KubeconfigFixture::root();
    let tree = org_tree();
    let provider = provider(&fixture, &tree).await;
    let before = provider.derived_kubernetes("root:org").expect("manager");

    tree.set_children("root", &["org", "fresh"]);
    provider.reset().await.expect("reset");

    assert_eq!(
        provider.targets(),
        vec!["root", "root:fresh", "root:org", "root:org:team"]
    );
    assert!(matches!(provider.entry("root:org"), ManagerEntry::Pending));
    let after = provider.derived_kubernetes("root:org").expect("manager");
    assert!(!Arc::ptr_eq(&before, &after));
    provider.close().await;
}

#[tokio::test]
async fn failed_reset_keeps_previous_targets() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;

    fixture.rewrite(BASE_URL, &[]);
    assert!(provider.reset().await.is_err());
    assert_eq!(provider.default_target(), "root");
    assert_eq!(provider.targets().len(), 4);
    provider.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;
    provider.close().await;
    provider.close().await;
}

#[tokio::test]
async fn unreachable_cluster_is_not_openshift() {
    let fixture = KubeconfigFixture::root();
    let provider = provider(&fixture, &org_tree()).await;
    assert!(!provider.is_openshift().await);
    provider.close().await;
}

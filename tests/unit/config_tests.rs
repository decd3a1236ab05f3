//! Unit tests for configuration parsing and watcher tunables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use kube_reload::config::{
    kubeconfig_paths, parse_millis, CLUSTER_DEBOUNCE_WINDOW_ENV, CLUSTER_POLL_INTERVAL_ENV,
    KUBECONFIG_DEBOUNCE_WINDOW_ENV, WORKSPACE_DEBOUNCE_WINDOW_ENV, WORKSPACE_POLL_INTERVAL_ENV,
};
use kube_reload::{AppError, GlobalConfig, WatchConfig};
use serial_test::serial;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn watch_defaults_match_documented_values() {
    let config = WatchConfig::default();
    assert_eq!(config.cluster_poll_interval, Duration::from_secs(30));
    assert_eq!(config.cluster_debounce_window, Duration::from_secs(5));
    assert_eq!(config.workspace_poll_interval, Duration::from_secs(60));
    assert_eq!(config.workspace_debounce_window, Duration::from_secs(5));
    assert_eq!(config.kubeconfig_debounce_window, Duration::from_millis(100));
}

#[test]
fn empty_toml_yields_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, GlobalConfig::default());
}

#[test]
fn parses_full_toml() {
    let config = GlobalConfig::from_toml_str(
        r#"
kubeconfig = "/etc/kcp/admin.kubeconfig"
context = "root"

[watch]
cluster_poll_interval_ms = 1000
cluster_debounce_window_ms = 200
workspace_poll_interval_ms = 2000
workspace_debounce_window_ms = 300
kubeconfig_debounce_window_ms = 50
"#,
    )
    .expect("valid config");

    assert_eq!(
        config.kubeconfig,
        Some(PathBuf::from("/etc/kcp/admin.kubeconfig"))
    );
    assert_eq!(config.context.as_deref(), Some("root"));
    assert_eq!(config.watch.cluster_poll_interval, Duration::from_secs(1));
    assert_eq!(config.watch.cluster_debounce_window, Duration::from_millis(200));
    assert_eq!(config.watch.workspace_poll_interval, Duration::from_secs(2));
    assert_eq!(config.watch.workspace_debounce_window, Duration::from_millis(300));
    assert_eq!(config.watch.kubeconfig_debounce_window, Duration::from_millis(50));
}

#[test]
fn partial_watch_table_keeps_other_defaults() {
    let config = GlobalConfig::from_toml_str("[watch]\ncluster_poll_interval_ms = 10\n")
        .expect("valid config");
    assert_eq!(config.watch.cluster_poll_interval, Duration::from_millis(10));
    assert_eq!(config.watch.workspace_poll_interval, Duration::from_secs(60));
}

#[test]
fn zero_duration_in_toml_is_rejected() {
    let err = GlobalConfig::from_toml_str("[watch]\nworkspace_poll_interval_ms = 0\n")
        .expect_err("zero interval must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn empty_context_is_rejected() {
    let err = GlobalConfig::from_toml_str("context = \"  \"\n").expect_err("empty context");
    assert!(err.to_string().contains("context must not be empty"));
}

#[test]
fn load_from_missing_path_fails() {
    let err = GlobalConfig::load_from_path("/nonexistent/kube-reload.toml")
        .expect_err("missing file must fail");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "context = \"kcp\"\n").expect("write config");
    let config = GlobalConfig::load_from_path(&path).expect("valid config");
    assert_eq!(config.context.as_deref(), Some("kcp"));
}

#[test]
fn parse_millis_accepts_positive_integers() {
    assert_eq!(parse_millis("250"), Some(Duration::from_millis(250)));
    assert_eq!(parse_millis(" 42 "), Some(Duration::from_millis(42)));
}

#[test]
fn parse_millis_rejects_invalid_and_non_positive() {
    assert_eq!(parse_millis("0"), None);
    assert_eq!(parse_millis("-5"), None);
    assert_eq!(parse_millis("fast"), None);
    assert_eq!(parse_millis("1.5"), None);
    assert_eq!(parse_millis(""), None);
}

#[test]
fn overrides_apply_to_every_tunable() {
    let mut config = WatchConfig::default();
    config.apply_overrides(lookup(&[
        (CLUSTER_POLL_INTERVAL_ENV, "11"),
        (CLUSTER_DEBOUNCE_WINDOW_ENV, "12"),
        (WORKSPACE_POLL_INTERVAL_ENV, "13"),
        (WORKSPACE_DEBOUNCE_WINDOW_ENV, "14"),
        (KUBECONFIG_DEBOUNCE_WINDOW_ENV, "15"),
    ]));
    assert_eq!(config.cluster_poll_interval, Duration::from_millis(11));
    assert_eq!(config.cluster_debounce_window, Duration::from_millis(12));
    assert_eq!(config.workspace_poll_interval, Duration::from_millis(13));
    assert_eq!(config.workspace_debounce_window, Duration::from_millis(14));
    assert_eq!(config.kubeconfig_debounce_window, Duration::from_millis(15));
}

#[test]
fn invalid_overrides_keep_previous_value() {
    let mut config = WatchConfig::default();
    config.apply_overrides(lookup(&[
        (CLUSTER_POLL_INTERVAL_ENV, "soon"),
        (WORKSPACE_POLL_INTERVAL_ENV, "0"),
        (KUBECONFIG_DEBOUNCE_WINDOW_ENV, "-100"),
    ]));
    assert_eq!(config, WatchConfig::default());
}

#[test]
#[serial]
fn from_env_reads_process_environment() {
    std::env::set_var(CLUSTER_DEBOUNCE_WINDOW_ENV, "750");
    let config = WatchConfig::from_env();
    std::env::remove_var(CLUSTER_DEBOUNCE_WINDOW_ENV);
    assert_eq!(config.cluster_debounce_window, Duration::from_millis(750));
    assert_eq!(config.cluster_poll_interval, Duration::from_secs(30));
}

#[test]
#[serial]
fn explicit_kubeconfig_path_wins() {
    std::env::set_var("KUBECONFIG", "/tmp/ignored");
    let paths = kubeconfig_paths(Some(std::path::Path::new("/tmp/explicit")));
    std::env::remove_var("KUBECONFIG");
    assert_eq!(paths, vec![PathBuf::from("/tmp/explicit")]);
}

#[test]
#[serial]
fn kubeconfig_env_is_split_into_paths() {
    let joined = std::env::join_paths(["/tmp/a.yaml", "/tmp/b.yaml"]).expect("join");
    std::env::set_var("KUBECONFIG", &joined);
    let paths = GlobalConfig::default().kubeconfig_paths();
    std::env::remove_var("KUBECONFIG");
    assert_eq!(
        paths,
        vec![PathBuf::from("/tmp/a.yaml"), PathBuf::from("/tmp/b.yaml")]
    );
}

#[test]
#[serial]
fn kubeconfig_falls_back_to_home() {
    std::env::remove_var("KUBECONFIG");
    let home = std::env::var_os("HOME");
    std::env::set_var("HOME", "/home/tester");
    let paths = kubeconfig_paths(None);
    match home {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
    assert_eq!(paths, vec![PathBuf::from("/home/tester/.kube/config")]);
}

#[test]
#[serial]
fn environment_overrides_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[watch]\nworkspace_poll_interval_ms = 2000\nworkspace_debounce_window_ms = 900\n",
    )
    .expect("write config");
    std::env::set_var(WORKSPACE_POLL_INTERVAL_ENV, "40");
    let loaded = GlobalConfig::load_from_path(&path);
    std::env::remove_var(WORKSPACE_POLL_INTERVAL_ENV);

    let config = loaded.expect("valid config");
    assert_eq!(config.watch.workspace_poll_interval, Duration::from_millis(40));
    assert_eq!(config.watch.workspace_debounce_window, Duration::from_millis(900));
}

#[test]
#[serial]
fn global_from_env_reads_process_environment() {
    std::env::set_var(KUBECONFIG_DEBOUNCE_WINDOW_ENV, "80");
    let config = GlobalConfig::from_env();
    std::env::remove_var(KUBECONFIG_DEBOUNCE_WINDOW_ENV);
    assert_eq!(config.watch.kubeconfig_debounce_window, Duration::from_millis(80));
    assert!(config.kubeconfig.is_none());
    assert!(config.context.is_none());
}

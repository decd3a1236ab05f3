//! Global configuration parsing, watcher tunables, and kubeconfig location.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Env var overriding [`WatchConfig::cluster_poll_interval`].
pub const CLUSTER_POLL_INTERVAL_ENV: &str = "CLUSTER_STATE_POLL_INTERVAL_MS";
/// Env var overriding [`WatchConfig::cluster_debounce_window`].
pub const CLUSTER_DEBOUNCE_WINDOW_ENV: &str = "CLUSTER_STATE_DEBOUNCE_WINDOW_MS";
/// Env var overriding [`WatchConfig::workspace_poll_interval`].
pub const WORKSPACE_POLL_INTERVAL_ENV: &str = "KCP_WORKSPACE_POLL_INTERVAL_MS";
/// Env var overriding [`WatchConfig::workspace_debounce_window`].
pub const WORKSPACE_DEBOUNCE_WINDOW_ENV: &str = "KCP_WORKSPACE_DEBOUNCE_WINDOW_MS";
/// Env var overriding [`WatchConfig::kubeconfig_debounce_window`].
pub const KUBECONFIG_DEBOUNCE_WINDOW_ENV: &str = "KUBECONFIG_DEBOUNCE_WINDOW_MS";

fn default_cluster_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_cluster_debounce_window() -> Duration {
    Duration::from_secs(5)
}

fn default_workspace_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_workspace_debounce_window() -> Duration {
    Duration::from_secs(5)
}

fn default_kubeconfig_debounce_window() -> Duration {
    Duration::from_millis(100)
}

/// Poll intervals and debounce windows for the three watchers.
///
/// Values are written as integer milliseconds in TOML (`*_ms` keys) and in
/// the override environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchConfig {
    /// How often the cluster discovery endpoint is polled.
    #[serde(
        rename = "cluster_poll_interval_ms",
        with = "millis",
        default = "default_cluster_poll_interval"
    )]
    pub cluster_poll_interval: Duration,
    /// Quiet period before a cluster capability change is reported.
    #[serde(
        rename = "cluster_debounce_window_ms",
        with = "millis",
        default = "default_cluster_debounce_window"
    )]
    pub cluster_debounce_window: Duration,
    /// How often the tenancy API is polled for workspaces.
    #[serde(
        rename = "workspace_poll_interval_ms",
        with = "millis",
        default = "default_workspace_poll_interval"
    )]
    pub workspace_poll_interval: Duration,
    /// Quiet period before a workspace tree change is reported.
    #[serde(
        rename = "workspace_debounce_window_ms",
        with = "millis",
        default = "default_workspace_debounce_window"
    )]
    pub workspace_debounce_window: Duration,
    /// Quiet period after the last kubeconfig file event.
    #[serde(
        rename = "kubeconfig_debounce_window_ms",
        with = "millis",
        default = "default_kubeconfig_debounce_window"
    )]
    pub kubeconfig_debounce_window: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            cluster_poll_interval: default_cluster_poll_interval(),
            cluster_debounce_window: default_cluster_debounce_window(),
            workspace_poll_interval: default_workspace_poll_interval(),
            workspace_debounce_window: default_workspace_debounce_window(),
            kubeconfig_debounce_window: default_kubeconfig_debounce_window(),
        }
    }
}

impl WatchConfig {
    /// Built-in defaults with process environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values must be positive integer milliseconds; anything else is
    /// ignored and the current value kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut Duration); 5] = [
            (CLUSTER_POLL_INTERVAL_ENV, &mut self.cluster_poll_interval),
            (CLUSTER_DEBOUNCE_WINDOW_ENV, &mut self.cluster_debounce_window),
            (WORKSPACE_POLL_INTERVAL_ENV, &mut self.workspace_poll_interval),
            (WORKSPACE_DEBOUNCE_WINDOW_ENV, &mut self.workspace_debounce_window),
            (KUBECONFIG_DEBOUNCE_WINDOW_ENV, &mut self.kubeconfig_debounce_window),
        ];
        for (key, slot) in fields {
            let Some(raw) = lookup(key) else {
                continue;
            };
            match parse_millis(&raw) {
                Some(value) => *slot = value,
                None => warn!(key, value = %raw, "ignoring invalid duration override"),
            }
        }
    }
}

/// Parse a positive integer millisecond count.
#[must_use]
pub fn parse_millis(raw: &str) -> Option<Duration> {
    let value: i64 = raw.trim().parse().ok()?;
    let value = u64::try_from(value).ok().filter(|ms| *ms > 0)?;
    Some(Duration::from_millis(value))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        if ms == 0 {
            return Err(serde::de::Error::custom("duration must be greater than zero"));
        }
        Ok(Duration::from_millis(ms))
    }
}

/// Global configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Explicit kubeconfig path. Falls back to `KUBECONFIG`, then
    /// `~/.kube/config`.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Override for the kubeconfig's current context.
    #[serde(default)]
    pub context: Option<String>,
    /// Watcher tunables.
    #[serde(default)]
    pub watch: WatchConfig,
}

impl GlobalConfig {
    /// Built-in defaults with process environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            watch: WatchConfig::from_env(),
            ..Self::default()
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// Watch tunables set in the process environment take precedence over
    /// the file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.watch.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Kubeconfig files this configuration resolves to, in merge order.
    #[must_use]
    pub fn kubeconfig_paths(&self) -> Vec<PathBuf> {
        kubeconfig_paths(self.kubeconfig.as_deref())
    }

    fn validate(&self) -> Result<()> {
        if self.context.as_deref().is_some_and(|ctx| ctx.trim().is_empty()) {
            return Err(AppError::Config("context must not be empty".into()));
        }
        if self
            .kubeconfig
            .as_deref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(AppError::Config("kubeconfig path must not be empty".into()));
        }
        Ok(())
    }
}

/// Resolve kubeconfig file locations.
///
/// An explicit path wins. Otherwise every non-empty entry of `KUBECONFIG`
/// is used, and finally `$HOME/.kube/config`.
#[must_use]
pub fn kubeconfig_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    if let Some(raw) = env::var_os("KUBECONFIG") {
        let paths: Vec<PathBuf> = env::split_paths(&raw)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !paths.is_empty() {
            return paths;
        }
    }
    env::var_os("HOME")
        .map(|home| vec![PathBuf::from(home).join(".kube").join("config")])
        .unwrap_or_default()
}

//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Kubeconfig could not be loaded or does not describe a usable context.
    Kubeconfig(String),
    /// Kubernetes API or client construction failure.
    Kube(String),
    /// File-system watch setup failure.
    Watch(String),
    /// Requested workspace or entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Kubeconfig(msg) => write!(f, "kubeconfig: {msg}"),
            Self::Kube(msg) => write!(f, "kube: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        Self::Kube(err.to_string())
    }
}

impl From<kube::config::KubeconfigError> for AppError {
    fn from(err: kube::config::KubeconfigError) -> Self {
        Self::Kubeconfig(err.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#![forbid(unsafe_code)]

//! Debounced watch-and-reload of externally controlled Kubernetes state:
//! cluster capabilities, kubeconfig files, and kcp workspace trees.

pub mod config;
pub mod errors;
pub mod kcp;
pub mod watcher;

pub use config::{GlobalConfig, WatchConfig};
pub use errors::{AppError, Result};

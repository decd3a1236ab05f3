//! Workspace URL grammar: `<base-url>/clusters/<workspace-path>`.

use crate::{AppError, Result};

/// Marker separating the base URL from the workspace path.
pub const CLUSTERS_MARKER: &str = "/clusters/";

/// Separator between workspace path segments.
pub const PATH_SEPARATOR: char = ':';

/// Split a server URL into `(base_url, workspace_path)`.
///
/// A trailing `/` on the workspace path is dropped. URLs without the
/// `/clusters/` marker come back whole with an empty workspace path.
#[must_use]
pub fn parse_server_url(server: &str) -> (String, String) {
    match server.find(CLUSTERS_MARKER) {
        Some(idx) => {
            let workspace = &server[idx + CLUSTERS_MARKER.len()..];
            (
                server[..idx].to_owned(),
                workspace.trim_end_matches('/').to_owned(),
            )
        }
        None => (server.to_owned(), String::new()),
    }
}

/// Address `workspace` on the server at `base_url`.
#[must_use]
pub fn construct_workspace_url(base_url: &str, workspace: &str) -> String {
    format!("{}{CLUSTERS_MARKER}{workspace}", base_url.trim_end_matches('/'))
}

/// Full path of the child named `child` under `parent`.
#[must_use]
pub fn child_path(parent: &str, child: &str) -> String {
    format!("{parent}{PATH_SEPARATOR}{child}")
}

/// Copy of `base` with its host rewritten to address `workspace`.
///
/// # Errors
///
/// Returns `AppError::Kube` if the rewritten URL is not a valid URI.
pub fn workspace_rest_config(base: &kube::Config, workspace: &str) -> Result<kube::Config> {
    let (base_url, _) = parse_server_url(&base.cluster_url.to_string());
    let url = construct_workspace_url(&base_url, workspace);
    let mut config = base.clone();
    config.cluster_url = url
        .parse::<http::Uri>()
        .map_err(|err| AppError::Kube(format!("invalid workspace url '{url}': {err}")))?;
    Ok(config)
}

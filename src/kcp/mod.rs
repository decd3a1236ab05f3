//! kcp workspace addressing, discovery, and the multi-workspace provider.

pub mod addressing;
pub mod discovery;
pub mod manager;
pub mod provider;

pub use addressing::{construct_workspace_url, parse_server_url};
pub use discovery::{discover_workspaces, DiscoveredWorkspaces, TenancyClient, WorkspaceLister};
pub use manager::Manager;
pub use provider::{ManagerEntry, MultiWorkspaceProvider};

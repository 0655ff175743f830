//! HTTP surface: deploy trigger, listings and `/projects/{name}/{path}` serving.

pub mod api;
pub mod resolver;
pub mod rewrite;
pub mod server;

pub use api::{AppState, SharedState};
pub use resolver::{AssetResolver, ProjectSummary, Resolved};
pub use server::{build_router, start_server};

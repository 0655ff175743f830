//! Deploy pipeline: clone, classify, build, publish.
//!
//! ## Module Map
//!
//! ```text
//!  POST /api/deploy
//!        │
//!        v
//!  ingest.rs   (DeployPipeline, RepositoryCloner, GitCliCloner)
//!        │ fetch_into() ─→ {deployments_dir}/{repo}-{ts}
//!        │ classify()
//!        v
//!  classify.rs (marker files, one level of nesting)
//!        │
//!        v
//!  build.rs    (BuildOrchestrator: npm / go / venv steps)
//!        │ ├─ Go, Python ─→ processes.rs (ProcessRegistry)
//!        │ └─ Node, Static, Unknown
//!        v
//!  publish.rs  (ArtifactPublisher) ─→ store.rs (ProjectStore generations)
//!        │
//!        └─ cleanup.rs (CleanupScheduler, deferred working dir removal)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                          |
//! |------------|---------------------------------------------------------|
//! | `models`   | `DeploymentId`, `ProjectType`, `DeploymentStage`        |
//! | `layout`   | Build-output and asset directory lists, index search    |
//! | `command`  | Subprocess steps bounded by a timeout                   |
//! | `tracker`  | In-memory deployment lifecycle records                  |
//! | `proxy`    | `RouteRegistrar` seam for `{project}.{host}` routes     |

pub mod build;
pub mod classify;
pub mod cleanup;
pub mod command;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod processes;
pub mod proxy;
pub mod publish;
pub mod store;
pub mod tracker;

pub use build::BuildOrchestrator;
pub use ingest::{CloneRequest, DeployOutcome, DeployPipeline, GitCliCloner, RepositoryCloner};
pub use models::{DeploymentId, ProjectType};
pub use store::ProjectStore;

//! CLI command implementations.
//!
//! | Module     | Commands handled        |
//! |------------|-------------------------|
//! | `serve`    | `Serve`                 |
//! | `deploy`   | `Deploy`                |
//! | `inspect`  | `Classify`, `Projects`  |

pub mod deploy;
pub mod inspect;
pub mod serve;

pub use deploy::cmd_deploy;
pub use inspect::{cmd_classify, cmd_projects};
pub use serve::cmd_serve;

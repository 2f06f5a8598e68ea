//! Runner configuration.
//!
//! `Config` is the contents of `.specrun/config.yaml`. Parsing is
//! forward-compatible (unknown fields are ignored), every field has a default,
//! and values are validated on load.

mod model;
mod operations;
pub mod types;


pub use model::Config;
pub use types::{RetryConfig, SchedulerConfig, SelectionConfig};

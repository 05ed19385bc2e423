//! batchgrid-core: shared types for the batch dispatcher.
//!
//! Holds the data model that flows between the partitioner, the scheduler
//! adapters and the resubmission controller, the TOML configuration that
//! replaces process-wide settings, and the length-delimited payload codec
//! used for job storage files.

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use config::{DispatchConfig, SchedulerKind};
pub use error::{CoreError, CoreResult};
pub use types::*;

//! batchgrid-dispatch: fan work out to a cluster scheduler and collect it.
//!
//! The [`Dispatcher`] drives one batch through repeated rounds:
//!
//! ```text
//! Dispatcher
//!   ├── partition   (tasks → JobUnits for this round)
//!   ├── materialize (storage/, sh/ files on disk)
//!   ├── SchedulerBackend (grid engine | slurm) ── CompletionMonitor
//!   │     or LocalExecutor (bounded process pool)
//!   └── reconcile   (out/ artifacts → succeeded / missing original ids)
//!         └── escalate and loop while ids are missing and rounds remain
//! ```
//!
//! Jobs never report back. The only success signal is the presence of the
//! job's result artifact in `out/`.

pub mod controller;
pub mod error;
pub mod escalate;
pub mod fallback;
pub mod flags;
pub mod layout;
pub mod materialize;
pub mod monitor;
pub mod names;
pub mod partition;
pub mod reconcile;
pub mod runner;
pub mod scheduler;

pub use controller::{DispatchOptions, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use layout::JobFolder;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use scheduler::{SchedulerBackend, create_backend};

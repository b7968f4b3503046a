//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use kbuild_slim::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{KslError, Result};

// Logging
pub use crate::logger::journal::Journal;

// Watch
pub use crate::watch::WatchDescriptor;
pub use crate::watch::backend::{ScriptedBackend, WatchBackend};
pub use crate::watch::mask::EventMask;
pub use crate::watch::session::{OpenOptions, WatchSession};

#[cfg(target_os = "linux")]
pub use crate::platform::inotify::InotifyBackend;

// Reduce
#[cfg(target_os = "linux")]
pub use crate::reduce::reduce;
pub use crate::reduce::coordinator::RunCoordinator;
pub use crate::reduce::planner::{ReductionPlan, ReductionPlanner};
pub use crate::reduce::{ReductionOutcome, ReductionRequest, reduce_with};

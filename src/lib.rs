#![deny(unsafe_code)]

//! kbuild_slim: shrink a kernel source tree to the files one build opens.
//!
//! While a supervised build runs, every directory of the tree is watched
//! with inotify for file opens. After a clean exit the captured events are
//! decoded, translated to tree-relative paths and subtracted from a
//! pre-build inventory; whatever the build never opened is deleted.
//!
//! Lost events and a corrupt event stream are fatal, and a failed build
//! stops the run before anything is deleted.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use kbuild_slim::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use kbuild_slim::core::config::Config;
//! use kbuild_slim::reduce::inventory::{ExclusionRules, scan_inventory};
//! ```
//!
//! Raw system calls are confined to [`platform::inotify`].

pub mod prelude;

pub mod core;
pub mod logger;
pub mod platform;
pub mod reduce;
pub mod watch;

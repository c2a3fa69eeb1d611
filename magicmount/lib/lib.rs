//! `magicmount` merges an ordered list of directory layers into one read-only tree without a
//! union filesystem driver.
//!
//! # Overview
//!
//! Every layer is walked against a fresh tmpfs. For each path the first layer to reach it decides
//! what it becomes:
//! - directories are recreated and merged child by child,
//! - regular files and FIFOs are bind mounted from the layer,
//! - symlinks and device nodes are recreated,
//! - `0:0` character devices (whiteouts) hide the path.
//!
//! Directories marked `trusted.overlay.opaque=y`, and directories no later layer has, are bind
//! mounted whole. Once the walk is done the tree is remounted read-only and moved onto the
//! destination, so the destination only ever sees a complete result.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use magicmount::{config::MountConfig, mount::MagicMount};
//!
//! fn main() -> magicmount::MagicMountResult<()> {
//!     let config = MountConfig::builder().name("modules").build();
//!     let summary = MagicMount::new(
//!         config,
//!         ["/data/adb/modules/foo/system", "/system"],
//!         "/system",
//!     )
//!     .mount()?;
//!
//!     println!("merged {} nodes", summary.get_nodes());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line arguments of the `magicmount` binary
//! - [`config`] - Run configuration and mount options
//! - [`log`] - Logging setup
//! - [`mount`] - Workspace, merge engine and mount orchestration
//! - [`utils`] - Constants and filesystem helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod log;
pub mod mount;
pub mod utils;

pub use error::*;

//! Building the merged tree and installing it.
//!
//! A run stages every layer as a read-only bind mount inside a private tmpfs [`Workspace`],
//! merges them into a fresh tmpfs with the [`MergeEngine`], remounts the result read-only and
//! moves it onto the destination. [`MagicMount`] sequences all of it.

mod attr;
mod materialize;
mod merge;
mod node;
mod orchestrator;
mod workspace;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use attr::*;
pub use materialize::materialize;
pub use merge::*;
pub use node::*;
pub use orchestrator::*;
pub use workspace::*;

//! Run configuration: ambient mount flags, naming, merge policy and logging target.

mod mount_config;
mod mount_option;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use mount_config::*;
pub use mount_option::*;

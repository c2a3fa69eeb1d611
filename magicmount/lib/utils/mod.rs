//! Utility functions and constants.

mod fs;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use fs::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory the workspace is created under when no other base is configured.
pub const DEFAULT_WORKSPACE_BASE: &str = "/dev";

/// The prefix of the randomly named workspace directory.
pub const WORKSPACE_PREFIX: &str = ".workdir_";

/// The number of random lowercase letters appended to [`WORKSPACE_PREFIX`].
pub const WORKSPACE_NAME_LEN: usize = 20;

/// The workspace subdirectory that hosts the live merge target.
pub const MERGE_TARGET_SUBDIR: &str = "0";

/// The reserved device directory that can never be a destination.
pub const RESERVED_DESTINATION: &str = "/dev";

/// The default source name given to the merge target's tmpfs mount.
pub const DEFAULT_MOUNT_NAME: &str = "tmpfs";

/// The extended attribute that marks an opaque overlay directory.
pub const OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// The extended attribute holding a node's SELinux security context.
pub const SECURITY_CONTEXT_XATTR: &str = "security.selinux";

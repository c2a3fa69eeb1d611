use std::path::PathBuf;

use getset::Getters;
use nix::mount::MsFlags;
use typed_builder::TypedBuilder;

use crate::utils::{DEFAULT_MOUNT_NAME, DEFAULT_WORKSPACE_BASE};

use super::MountOption;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where diagnostic logs are written while a merge runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// No logging; only the final diagnostic is printed.
    #[default]
    None,

    /// Log to standard error.
    Stderr,

    /// Log to a file, created or appended to.
    File(PathBuf),
}

/// The settings shared by the stager, the merge engine and the orchestrator for one run.
///
/// ## Examples
///
/// ```
/// use magicmount::config::{MountConfig, MountOption};
/// use nix::mount::MsFlags;
///
/// let config = MountConfig::builder()
///     .options(vec![MountOption::Nosuid, MountOption::Nodev])
///     .recursive(true)
///     .name("modules")
///     .build();
///
/// assert_eq!(
///     config.ambient_flags(),
///     MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_REC
/// );
/// assert_eq!(config.get_name(), "modules");
/// ```
#[derive(Debug, Clone, TypedBuilder, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct MountConfig {
    /// Standard mount options applied to every bind mount made during the run.
    #[builder(default)]
    options: Vec<MountOption>,

    /// Whether bind mounts also carry the submounts of their source.
    #[builder(default)]
    recursive: bool,

    /// The source name of the merge target's tmpfs, shown in the mount table.
    #[builder(default = DEFAULT_MOUNT_NAME.to_string(), setter(into))]
    name: String,

    /// Disables the unmerged-folder fast path so every directory is merged file by file.
    #[builder(default)]
    full_merge: bool,

    /// The directory the private workspace is created under.
    #[builder(default = PathBuf::from(DEFAULT_WORKSPACE_BASE), setter(into))]
    workspace_base: PathBuf,

    /// Where logs go.
    #[builder(default)]
    log_target: LogTarget,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MountConfig {
    /// Returns the mount flags OR-ed into every bind mount of the run.
    pub fn ambient_flags(&self) -> MsFlags {
        let mut flags = MountOption::to_flags(&self.options);
        if self.recursive {
            flags |= MsFlags::MS_REC;
        }

        flags
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for MountConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

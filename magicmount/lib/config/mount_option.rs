use std::{fmt, str::FromStr};

use nix::mount::MsFlags;

use crate::MagicMountError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A standard mount option that translates to a single [`MsFlags`] bit.
///
/// The names follow `mount(8)`:
/// ```
/// use magicmount::config::MountOption;
/// use nix::mount::MsFlags;
///
/// let option = "nosuid".parse::<MountOption>().unwrap();
/// assert_eq!(option.flag(), MsFlags::MS_NOSUID);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MountOption {
    /// Ignore set-user-ID and set-group-ID bits.
    Nosuid,

    /// Do not interpret character or block special devices.
    Nodev,

    /// Do not allow programs to be executed.
    Noexec,

    /// All I/O is done synchronously.
    Sync,

    /// Directory updates are done synchronously.
    Dirsync,

    /// Do not update access times.
    Noatime,

    /// Do not update directory access times.
    Nodiratime,

    /// Update access times relative to modify or change time.
    Relatime,

    /// Always update access times.
    Strictatime,

    /// Allow mandatory locks.
    Mand,

    /// Suppress some kernel warning messages.
    Silent,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MountOption {
    /// Every supported option, in `mount(8)` documentation order.
    pub const ALL: [MountOption; 11] = [
        Self::Nosuid,
        Self::Nodev,
        Self::Noexec,
        Self::Sync,
        Self::Dirsync,
        Self::Noatime,
        Self::Nodiratime,
        Self::Relatime,
        Self::Strictatime,
        Self::Mand,
        Self::Silent,
    ];

    /// Returns the mount flag this option sets.
    pub fn flag(&self) -> MsFlags {
        match self {
            Self::Nosuid => MsFlags::MS_NOSUID,
            Self::Nodev => MsFlags::MS_NODEV,
            Self::Noexec => MsFlags::MS_NOEXEC,
            Self::Sync => MsFlags::MS_SYNCHRONOUS,
            Self::Dirsync => MsFlags::MS_DIRSYNC,
            Self::Noatime => MsFlags::MS_NOATIME,
            Self::Nodiratime => MsFlags::MS_NODIRATIME,
            Self::Relatime => MsFlags::MS_RELATIME,
            Self::Strictatime => MsFlags::MS_STRICTATIME,
            Self::Mand => MsFlags::MS_MANDLOCK,
            Self::Silent => MsFlags::MS_SILENT,
        }
    }

    /// Returns the `mount(8)` name of this option.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nosuid => "nosuid",
            Self::Nodev => "nodev",
            Self::Noexec => "noexec",
            Self::Sync => "sync",
            Self::Dirsync => "dirsync",
            Self::Noatime => "noatime",
            Self::Nodiratime => "nodiratime",
            Self::Relatime => "relatime",
            Self::Strictatime => "strictatime",
            Self::Mand => "mand",
            Self::Silent => "silent",
        }
    }

    /// Folds a list of options into a single set of mount flags.
    pub fn to_flags<'a>(options: impl IntoIterator<Item = &'a MountOption>) -> MsFlags {
        options
            .into_iter()
            .fold(MsFlags::empty(), |flags, option| flags | option.flag())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for MountOption {
    type Err = MagicMountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|option| option.name() == s)
            .ok_or_else(|| {
                MagicMountError::custom(anyhow::anyhow!("unknown mount option: {}", s))
            })
    }
}

impl fmt::Display for MountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

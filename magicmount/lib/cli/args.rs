use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{LogTarget, MountConfig, MountOption},
    utils::{DEFAULT_MOUNT_NAME, DEFAULT_WORKSPACE_BASE},
};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Merge DIR1, DIR2... into one read-only tree and mount it on DIR
#[derive(Debug, Parser)]
#[command(name = "magicmount", author, about, version, styles=styles::styles())]
pub struct MagicMountArgs {
    /// Merge the content of mounts under DIR1, DIR2... as well
    #[arg(short, long)]
    pub recursive: bool,

    /// Give the merged mount a nice name
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_MOUNT_NAME)]
    pub name: String,

    /// Log every step to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Log every step to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Merge every directory entry by entry, even when only one layer has it
    #[arg(short = 'a', long)]
    pub full_merge: bool,

    /// Comma separated mount options applied to every bind mount
    #[arg(short, long, value_name = "OPTIONS", value_delimiter = ',')]
    pub options: Vec<MountOption>,

    /// Directory the private workspace is created in
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_WORKSPACE_BASE)]
    pub workdir: PathBuf,

    /// Layers, highest precedence first, followed by the mount destination
    #[arg(value_name = "DIR", required = true, num_args = 2..)]
    pub paths: Vec<PathBuf>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl MagicMountArgs {
    /// Returns where logs should go. `--log-file` wins over `--verbose`.
    pub fn log_target(&self) -> LogTarget {
        match (&self.log_file, self.verbose) {
            (Some(path), _) => LogTarget::File(path.clone()),
            (None, true) => LogTarget::Stderr,
            (None, false) => LogTarget::None,
        }
    }

    /// Returns the destination, the last path given.
    pub fn destination(&self) -> Option<&PathBuf> {
        self.paths.last()
    }

    /// Splits the arguments into the run configuration, the layers and the destination.
    pub fn into_parts(self) -> (MountConfig, Vec<PathBuf>, PathBuf) {
        let log_target = self.log_target();
        let mut layers = self.paths;
        let destination = layers.pop().unwrap_or_default();

        let config = MountConfig::builder()
            .options(self.options)
            .recursive(self.recursive)
            .name(self.name)
            .full_merge(self.full_merge)
            .workspace_base(self.workdir)
            .log_target(log_target)
            .build();

        (config, layers, destination)
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

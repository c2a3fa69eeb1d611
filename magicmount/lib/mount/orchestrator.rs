use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};
use nix::mount::{self, MsFlags};
use scopeguard::ScopeGuard;

use crate::{config::MountConfig, utils, MagicMountError, MagicMountResult};

use super::{MergeEngine, MergeTarget, Workspace};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Merges an ordered list of layers and installs the result, read-only, on a destination.
///
/// ## Examples
///
/// ```no_run
/// use magicmount::{config::MountConfig, mount::MagicMount};
///
/// let config = MountConfig::builder().recursive(true).build();
/// let summary = MagicMount::new(config, ["/data/adb/modules/a/system", "/system"], "/system")
///     .mount()?;
///
/// println!("{} nodes, installed by {}", summary.get_nodes(), summary.get_method());
/// # Ok::<(), magicmount::MagicMountError>(())
/// ```
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct MagicMount {
    /// The run configuration.
    config: MountConfig,

    /// The layers, highest precedence first.
    layers: Vec<PathBuf>,

    /// Where the merged tree is installed.
    destination: PathBuf,
}

/// How the merged tree reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMethod {
    /// The merge target mount was moved onto the destination.
    Moved,

    /// Moving was rejected, so the merge target was bind mounted onto the destination.
    Bound,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct MountSummary {
    /// The canonical destination.
    #[getset(get = "pub with_prefix")]
    destination: PathBuf,

    /// The number of destination paths recorded by the merge.
    #[getset(get_copy = "pub with_prefix")]
    nodes: usize,

    /// The number of those paths that were closed to later layers.
    #[getset(get_copy = "pub with_prefix")]
    ignored: usize,

    /// How the tree was installed.
    #[getset(get_copy = "pub with_prefix")]
    method: FinalizeMethod,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MagicMount {
    /// Creates a run that merges `layers` onto `destination`.
    pub fn new(
        config: MountConfig,
        layers: impl IntoIterator<Item = impl Into<PathBuf>>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            layers: layers.into_iter().map(Into::into).collect(),
            destination: destination.into(),
        }
    }

    /// Validates the inputs, builds the merged tree and installs it on the destination.
    ///
    /// The destination only ever receives a completely merged tree. Whatever happens, the
    /// workspace is gone when this returns.
    pub fn mount(&self) -> MagicMountResult<MountSummary> {
        let destination = validate_destination(&self.destination)?;
        let layers = self
            .layers
            .iter()
            .map(|layer| validate_layer(layer))
            .collect::<MagicMountResult<Vec<_>>>()?;

        let mut workspace = Workspace::create(&self.config)?;
        let result = self.build(&mut workspace, &layers, destination);

        if let Err(e) = workspace.teardown() {
            tracing::warn!("unable to remove workspace: {}", e);
        }

        result
    }

    fn build(
        &self,
        workspace: &mut Workspace,
        layers: &[PathBuf],
        destination: PathBuf,
    ) -> MagicMountResult<MountSummary> {
        let staged = workspace
            .stage_layers(layers, self.config.ambient_flags())?
            .to_vec();

        let target = scopeguard::guard(
            workspace.mount_merge_target(self.config.get_name())?,
            |target: MergeTarget| {
                if let Err(e) = target.rollback() {
                    tracing::error!("rollback: {}", e);
                }
            },
        );

        let mut engine = MergeEngine::new(&self.config, staged.iter().cloned());
        for (position, staged_root) in staged.iter().enumerate() {
            engine.merge(staged_root, target.get_path(), position + 1)?;
        }

        let registry = engine.into_registry();
        tracing::info!(
            "merged {} layers: {} nodes recorded, {} closed",
            staged.len(),
            registry.len(),
            registry.ignored_count()
        );

        let method = finalize(target.get_path(), &destination)?;
        // Installed, so the guard must no longer roll it back.
        ScopeGuard::into_inner(target);

        Ok(MountSummary {
            destination,
            nodes: registry.len(),
            ignored: registry.ignored_count(),
            method,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that `path` can receive the merged tree and returns its canonical form.
pub fn validate_destination(path: &Path) -> MagicMountResult<PathBuf> {
    let invalid = |reason: String| MagicMountError::InvalidDestination {
        path: path.to_path_buf(),
        reason,
    };

    let reserved = Path::new(utils::RESERVED_DESTINATION);
    if path == reserved {
        return Err(invalid("reserved device directory".to_string()));
    }

    let canonical = fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
    if canonical == reserved {
        return Err(invalid("reserved device directory".to_string()));
    }

    if !canonical.is_dir() {
        return Err(invalid(
            io::Error::from_raw_os_error(libc::ENOTDIR).to_string(),
        ));
    }

    Ok(canonical)
}

/// Checks that `path` is a directory on a mergeable filesystem and returns its canonical form.
///
/// Layers are staged after the process has moved into the workspace, so relative paths must be
/// resolved here.
pub fn validate_layer(path: &Path) -> MagicMountResult<PathBuf> {
    let invalid = |reason: String| MagicMountError::InvalidLayer {
        path: path.to_path_buf(),
        reason,
    };

    let canonical = fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
    if !canonical.is_dir() {
        return Err(invalid(
            io::Error::from_raw_os_error(libc::ENOTDIR).to_string(),
        ));
    }

    if let Ok(Some(fs_type)) = utils::unsupported_filesystem(&canonical) {
        return Err(MagicMountError::UnsupportedFilesystem {
            path: path.to_path_buf(),
            fs_type,
        });
    }

    Ok(canonical)
}

/// Makes the merge target read-only and private, then installs it on `destination`.
fn finalize(target: &Path, destination: &Path) -> MagicMountResult<FinalizeMethod> {
    let error = |operation: &'static str, path: &Path, errno: nix::Error| {
        MagicMountError::Finalize {
            operation,
            path: path.to_path_buf(),
            source: errno.into(),
        }
    };

    mount::mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|errno| error("remount", target, errno))?;

    mount::mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|errno| error("make private", target, errno))?;

    match mount::mount(
        Some(target),
        destination,
        None::<&str>,
        MsFlags::MS_MOVE,
        None::<&str>,
    ) {
        Ok(()) => {
            tracing::info!("moved {} onto {}", target.display(), destination.display());
            Ok(FinalizeMethod::Moved)
        }
        Err(errno) => {
            tracing::warn!(
                "unable to move {} onto {}: {}, falling back to bind mount",
                target.display(),
                destination.display(),
                errno.desc()
            );

            mount::mount(
                Some(target),
                destination,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )
            .map_err(|errno| error("bind", destination, errno))?;

            tracing::info!("bound {} onto {}", target.display(), destination.display());
            Ok(FinalizeMethod::Bound)
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for FinalizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moved => write!(f, "move"),
            Self::Bound => write!(f, "bind"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::{
    env,
    fs::{self, DirBuilder},
    io,
    os::unix::fs::{DirBuilderExt, MetadataExt},
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};
use nix::{
    errno::Errno,
    mount::{self, MntFlags, MsFlags},
    unistd,
};
use rand::Rng;

use crate::{config::MountConfig, utils, MagicMountError, MagicMountResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The private tmpfs scratch area of one run.
///
/// The workspace lives at `<base>/.workdir_<random>`. Layers are staged under `<root>/1`,
/// `<root>/2` and so on, and the live merge target is mounted at `<root>/0`. The workspace is torn
/// down when dropped, and [`Workspace::teardown`] may also be called explicitly any number of
/// times.
#[derive(Debug, Getters)]
pub struct Workspace {
    /// The workspace directory.
    #[getset(get = "pub with_prefix")]
    root: PathBuf,

    /// The staged layer roots, in layer order.
    #[getset(get = "pub with_prefix")]
    staged: Vec<PathBuf>,

    /// The working directory to return to on teardown.
    previous_cwd: Option<PathBuf>,

    /// Whether the workspace tmpfs is still mounted.
    mounted: bool,

    /// Set once teardown has succeeded.
    torn_down: bool,
}

/// The live merge target together with the identity it had when it was mounted.
///
/// The identity lets rollback tell whether `path` still refers to the tmpfs this run created.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct MergeTarget {
    /// The mountpoint inside the workspace.
    #[getset(get = "pub with_prefix")]
    path: PathBuf,

    /// The device number of the mounted tmpfs root.
    #[getset(get_copy = "pub with_prefix")]
    dev: u64,

    /// The inode number of the mounted tmpfs root.
    #[getset(get_copy = "pub with_prefix")]
    ino: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Workspace {
    /// Creates and mounts a fresh workspace under the configured base and changes into it.
    pub fn create(config: &MountConfig) -> MagicMountResult<Self> {
        let base = resolve_base(config.get_workspace_base())?;
        let root = loop {
            let candidate = base.join(generate_name());
            if candidate.symlink_metadata().is_err() {
                break candidate;
            }
        };

        tracing::info!("setup: workdir=[{}]", root.display());

        DirBuilder::new()
            .mode(0o755)
            .create(&root)
            .map_err(|source| MagicMountError::WorkspaceSetup {
                path: root.clone(),
                source,
            })?;

        if let Err(errno) = mount::mount(
            Some("tmpfs"),
            &root,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        ) {
            let _ = fs::remove_dir(&root);
            return Err(MagicMountError::WorkspaceSetup {
                path: root,
                source: errno.into(),
            });
        }

        let workspace = Self {
            root,
            staged: Vec::new(),
            previous_cwd: env::current_dir().ok(),
            mounted: true,
            torn_down: false,
        };

        // From here on, dropping `workspace` tears it down.
        unistd::chdir(&workspace.root).map_err(|errno| MagicMountError::WorkspaceSetup {
            path: workspace.root.clone(),
            source: errno.into(),
        })?;

        Ok(workspace)
    }

    /// Stages each layer as a read-only private bind mount at `<root>/<index>`.
    ///
    /// `flags` are the run's ambient flags. Returns the staged roots in layer order.
    pub fn stage_layers(
        &mut self,
        layers: &[PathBuf],
        flags: MsFlags,
    ) -> MagicMountResult<&[PathBuf]> {
        for (position, layer) in layers.iter().enumerate() {
            let index = position + 1;
            let staged = self.root.join(index.to_string());
            let error = |source: io::Error| MagicMountError::LayerStaging {
                index,
                path: layer.clone(),
                source,
            };

            DirBuilder::new().mode(0o755).create(&staged).map_err(error)?;

            mount::mount(
                Some(layer.as_path()),
                &staged,
                None::<&str>,
                MsFlags::MS_BIND | flags,
                None::<&str>,
            )
            .map_err(|errno| error(errno.into()))?;

            mount::mount(
                None::<&str>,
                &staged,
                None::<&str>,
                MsFlags::MS_BIND
                    | MsFlags::MS_REMOUNT
                    | MsFlags::MS_RDONLY
                    | flags.difference(MsFlags::MS_REC),
                None::<&str>,
            )
            .map_err(|errno| error(errno.into()))?;

            mount::mount(
                None::<&str>,
                &staged,
                None::<&str>,
                propagation_flags(MsFlags::MS_PRIVATE, flags),
                None::<&str>,
            )
            .map_err(|errno| error(errno.into()))?;

            tracing::info!(
                "setup: layer[{}]=[{}] workdir=[{}]",
                index,
                layer.display(),
                staged.display()
            );
            self.staged.push(staged);
        }

        Ok(&self.staged)
    }

    /// Mounts the live merge target, a tmpfs named `name`, at `<root>/0`.
    pub fn mount_merge_target(&self, name: &str) -> MagicMountResult<MergeTarget> {
        let path = self.root.join(utils::MERGE_TARGET_SUBDIR);
        let error = |source: io::Error| MagicMountError::WorkspaceSetup {
            path: path.clone(),
            source,
        };

        DirBuilder::new().mode(0o755).create(&path).map_err(error)?;
        mount::mount(
            Some(name),
            &path,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|errno| error(errno.into()))?;

        tracing::info!("setup: mountpoint=[{}] name=[{}]", path.display(), name);
        MergeTarget::capture(&path).map_err(error)
    }

    /// Unmounts and removes the workspace and restores the previous working directory.
    ///
    /// Already unmounted or removed parts are skipped, so calling this again is harmless.
    pub fn teardown(&mut self) -> MagicMountResult<()> {
        if self.torn_down {
            return Ok(());
        }

        if let Some(previous_cwd) = self.previous_cwd.take() {
            if let Err(errno) = unistd::chdir(&previous_cwd) {
                tracing::warn!(
                    "teardown: unable to return to {}: {}",
                    previous_cwd.display(),
                    errno.desc()
                );
            }
        }

        if self.mounted {
            match mount::umount2(&self.root, MntFlags::MNT_DETACH) {
                Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => self.mounted = false,
                Err(errno) => {
                    return Err(MagicMountError::WorkspaceSetup {
                        path: self.root.clone(),
                        source: errno.into(),
                    })
                }
            }
        }

        match fs::remove_dir(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MagicMountError::WorkspaceSetup {
                    path: self.root.clone(),
                    source,
                })
            }
        }

        tracing::info!("teardown: removed workdir=[{}]", self.root.display());
        self.staged.clear();
        self.torn_down = true;
        Ok(())
    }

    /// Returns true once the workspace has been torn down.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl MergeTarget {
    /// Records the current identity of `path`.
    pub fn capture(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Returns true when `path` still resolves to the recorded device and inode.
    pub fn is_same_mount(&self) -> bool {
        fs::metadata(&self.path)
            .map(|metadata| metadata.dev() == self.dev && metadata.ino() == self.ino)
            .unwrap_or(false)
    }

    /// Lazily unmounts the merge target, but only while it is still the mount this run created.
    pub fn rollback(&self) -> MagicMountResult<()> {
        if !self.is_same_mount() {
            tracing::warn!(
                "rollback: {} no longer holds the merge target, leaving it alone",
                self.path.display()
            );
            return Ok(());
        }

        mount::umount2(&self.path, MntFlags::MNT_DETACH).map_err(|errno| {
            MagicMountError::Finalize {
                operation: "unmount",
                path: self.path.clone(),
                source: errno.into(),
            }
        })?;

        tracing::warn!("rollback: unmounted {}", self.path.display());
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a fresh workspace directory name: the prefix followed by random lowercase letters.
pub fn generate_name() -> String {
    let mut rng = rand::rng();
    let suffix = (0..utils::WORKSPACE_NAME_LEN)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect::<String>();

    format!("{}{}", utils::WORKSPACE_PREFIX, suffix)
}

/// Returns the absolute, canonical form of the workspace base.
///
/// Every workspace path is used after the process has changed into the workspace, so a relative
/// base must be resolved first.
pub(crate) fn resolve_base(base: &Path) -> MagicMountResult<PathBuf> {
    fs::canonicalize(base).map_err(|source| MagicMountError::WorkspaceSetup {
        path: base.to_path_buf(),
        source,
    })
}

/// Combines a propagation type with the only ambient flags the kernel accepts alongside it.
pub(crate) fn propagation_flags(propagation: MsFlags, flags: MsFlags) -> MsFlags {
    propagation | (flags & (MsFlags::MS_REC | MsFlags::MS_SILENT))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("teardown: {}", e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::{
    fs::{self, DirBuilder, OpenOptions},
    io,
    os::unix::fs::{self as unix_fs, DirBuilderExt, MetadataExt, OpenOptionsExt},
    path::Path,
};

use nix::{
    mount::{self, MsFlags},
    sys::stat::{self, Mode, SFlag},
};

use crate::{utils, MagicMountError, MagicMountResult};

use super::{attr, NodeKind, SourceNode};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the object at `destination` that represents `source` in the merged tree.
///
/// `flags` are OR-ed into every bind mount. Returns the kind `source` resolved to. A half-created
/// node is not cleaned up here; it disappears with the merge target.
pub fn materialize(source: &Path, destination: &Path, flags: MsFlags) -> MagicMountResult<NodeKind> {
    let node = SourceNode::inspect(source)?;
    materialize_node(&node, destination, flags)?;
    Ok(node.get_kind())
}

/// Creates the object for an already inspected `node`.
pub(crate) fn materialize_node(
    node: &SourceNode,
    destination: &Path,
    flags: MsFlags,
) -> MagicMountResult<()> {
    let source = node.get_path().as_path();
    match node.get_kind() {
        NodeKind::Directory => make_dir(source, destination),
        NodeKind::File | NodeKind::Fifo => {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o755)
                .open(destination)
                .map_err(|e| materialize_error("create", source, destination, e))?;

            bind_mount(source, destination, flags)
        }
        NodeKind::Symlink => {
            let target = fs::read_link(source)
                .map_err(|e| materialize_error("readlink", source, destination, e))?;
            unix_fs::symlink(&target, destination)
                .map_err(|e| materialize_error("link", source, destination, e))?;

            tracing::debug!("link {} -> {}", destination.display(), target.display());
            Ok(())
        }
        kind @ (NodeKind::BlockDevice | NodeKind::CharDevice) => {
            let rdev = node.get_metadata().rdev();
            let sflag = if kind == NodeKind::BlockDevice {
                SFlag::S_IFBLK
            } else {
                SFlag::S_IFCHR
            };

            stat::mknod(destination, sflag, Mode::empty(), rdev as libc::dev_t)
                .map_err(|errno| materialize_error("mknod", source, destination, errno.into()))?;
            attr::clone_attributes(source, destination)?;

            tracing::debug!(
                "mknod {} {} <- {} ({}:{})",
                kind,
                destination.display(),
                source.display(),
                stat::major(rdev as libc::dev_t),
                stat::minor(rdev as libc::dev_t)
            );
            Ok(())
        }
        NodeKind::Whiteout => {
            tracing::debug!("ignore {} <- {}", destination.display(), source.display());
            Ok(())
        }
    }
}

/// Bind mounts `source` onto the existing `destination`.
pub(crate) fn bind_mount(source: &Path, destination: &Path, flags: MsFlags) -> MagicMountResult<()> {
    mount::mount(
        Some(source),
        destination,
        None::<&str>,
        MsFlags::MS_BIND | flags,
        None::<&str>,
    )
    .map_err(|errno| materialize_error("bind", source, destination, errno.into()))?;

    tracing::debug!("bind {} <- {}", destination.display(), source.display());
    Ok(())
}

/// Creates the directory with mode 0 and copies the source's attributes onto it.
///
/// An existing directory is reused; this is how the root of the merge target is handled.
fn make_dir(source: &Path, destination: &Path) -> MagicMountResult<()> {
    match DirBuilder::new().mode(0).create(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && utils::is_dir_nofollow(destination) => {}
        Err(e) => return Err(materialize_error("mkdir", source, destination, e)),
    }

    attr::clone_attributes(source, destination)?;

    tracing::debug!("mkdir {} <- {}", destination.display(), source.display());
    Ok(())
}

fn materialize_error(
    operation: &'static str,
    source: &Path,
    destination: &Path,
    error: io::Error,
) -> MagicMountError {
    MagicMountError::Materialize {
        operation,
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        source: error,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::{fs::PermissionsExt, net::UnixListener};

    use super::*;

    #[test]
    fn test_materialize_directory() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        fs::create_dir(&source)?;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o750))?;

        let kind = materialize(&source, &destination, MsFlags::empty())?;

        assert_eq!(kind, NodeKind::Directory);
        assert!(utils::is_dir_nofollow(&destination));
        assert_eq!(fs::metadata(&destination)?.mode() & 0o777, 0o750);
        Ok(())
    }

    #[test]
    fn test_materialize_existing_directory_is_reused() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        fs::create_dir(&source)?;
        fs::create_dir(&destination)?;
        fs::write(destination.join("kept"), "")?;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o711))?;

        materialize(&source, &destination, MsFlags::empty())?;

        assert!(destination.join("kept").exists());
        assert_eq!(fs::metadata(&destination)?.mode() & 0o777, 0o711);
        Ok(())
    }

    #[test]
    fn test_materialize_directory_over_file_fails() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        fs::create_dir(&source)?;
        fs::write(&destination, "")?;

        let result = materialize(&source, &destination, MsFlags::empty());
        assert!(matches!(
            result,
            Err(MagicMountError::Materialize { operation: "mkdir", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_materialize_symlink() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        unix_fs::symlink("/system/bin/sh", &source)?;

        let kind = materialize(&source, &destination, MsFlags::empty())?;

        assert_eq!(kind, NodeKind::Symlink);
        assert_eq!(fs::read_link(&destination)?, Path::new("/system/bin/sh"));
        Ok(())
    }

    #[test]
    fn test_materialize_whiteout_has_no_effect() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        let _listener = UnixListener::bind(&source)?;

        let kind = materialize(&source, &destination, MsFlags::empty())?;

        assert_eq!(kind, NodeKind::Whiteout);
        assert!(destination.symlink_metadata().is_err());
        Ok(())
    }

    #[test]
    fn test_materialize_missing_source() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let result = materialize(
            &temp_dir.path().join("missing"),
            &temp_dir.path().join("destination"),
            MsFlags::empty(),
        );

        assert!(matches!(result, Err(MagicMountError::Inspect { .. })));
        Ok(())
    }
}

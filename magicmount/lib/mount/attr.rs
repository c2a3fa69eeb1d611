use std::{
    fs::{self, Permissions},
    io,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::Path,
};

use nix::unistd::{self, Gid, Uid};

use crate::{utils::SECURITY_CONTEXT_XATTR, MagicMountError, MagicMountResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies permission bits, ownership and the SELinux context of `source` onto `destination`.
///
/// `source` is followed like `stat(2)`. Only the `0o777` permission bits are copied. A failure to
/// read the source's security context fails the clone, except that a source without one is not
/// a failure: it leaves the destination's context as the filesystem assigned it.
pub fn clone_attributes(source: &Path, destination: &Path) -> MagicMountResult<()> {
    let error = |source_error: io::Error| MagicMountError::AttributeClone {
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        source: source_error,
    };

    let metadata = fs::metadata(source).map_err(error)?;
    let context = read_security_context(source).map_err(error)?;

    fs::set_permissions(destination, Permissions::from_mode(metadata.mode() & 0o777))
        .map_err(error)?;

    unistd::chown(
        destination,
        Some(Uid::from_raw(metadata.uid())),
        Some(Gid::from_raw(metadata.gid())),
    )
    .map_err(|errno| error(errno.into()))?;

    if let Some(context) = context {
        xattr::set(destination, SECURITY_CONTEXT_XATTR, &context).map_err(error)?;
    }

    Ok(())
}

/// Reads the raw security context of `path`, or `None` when it has none.
///
/// Having no context is deliberately not a read failure. That covers both an unset attribute
/// (`ENODATA`) and a filesystem without extended attribute support (`ENOTSUP`), so layers on
/// such filesystems still merge. Any other error, such as a missing path, is returned.
pub fn read_security_context(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match xattr::get(path, SECURITY_CONTEXT_XATTR) {
        Ok(context) => Ok(context),
        Err(e) if e.raw_os_error() == Some(libc::ENOTSUP) => Ok(None),
        Err(e) => Err(e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

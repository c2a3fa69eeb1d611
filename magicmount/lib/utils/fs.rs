use std::{io, path::Path};

use nix::sys::statfs::{self, FsType};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Pseudo filesystems that are never merged, paired with the name used in diagnostics.
const UNSUPPORTED_FILESYSTEMS: &[(FsType, &str)] = &[
    (statfs::PROC_SUPER_MAGIC, "proc"),
    (statfs::SELINUX_MAGIC, "selinuxfs"),
    (statfs::SYSFS_MAGIC, "sysfs"),
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the name of the pseudo filesystem `path` lives on, or `None` when the filesystem can
/// be merged.
///
/// `statfs` follows symlinks, so a link pointing into `/proc` is reported as `proc`.
pub fn unsupported_filesystem(path: &Path) -> io::Result<Option<&'static str>> {
    let fs_type = statfs::statfs(path)?.filesystem_type();
    Ok(UNSUPPORTED_FILESYSTEMS
        .iter()
        .find(|(magic, _)| *magic == fs_type)
        .map(|(_, name)| *name))
}

/// Returns true when `path` is a directory, without following a trailing symlink.
pub fn is_dir_nofollow(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|metadata| metadata.file_type().is_dir())
        .unwrap_or(false)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn test_fs_unsupported_filesystem_regular_dir() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        assert_eq!(unsupported_filesystem(temp_dir.path())?, None);
        Ok(())
    }

    #[test]
    fn test_fs_unsupported_filesystem_proc() -> anyhow::Result<()> {
        if !Path::new("/proc/self").exists() {
            return Ok(());
        }

        assert_eq!(unsupported_filesystem(Path::new("/proc/self"))?, Some("proc"));
        Ok(())
    }

    #[test]
    fn test_fs_unsupported_filesystem_missing_path() {
        assert!(unsupported_filesystem(Path::new("/nonexistent/magicmount/path")).is_err());
    }

    #[test]
    fn test_fs_is_dir_nofollow() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().join("dir");
        let link = temp_dir.path().join("link");
        std::fs::create_dir(&dir)?;
        symlink(&dir, &link)?;

        assert!(is_dir_nofollow(&dir));
        assert!(!is_dir_nofollow(&link));
        assert!(!is_dir_nofollow(&temp_dir.path().join("missing")));
        Ok(())
    }
}

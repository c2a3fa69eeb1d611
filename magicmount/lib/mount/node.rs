use std::{
    collections::HashMap,
    fmt,
    fs::Metadata,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};

use crate::{MagicMountError, MagicMountResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of filesystem object a layer entry resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A directory; merged child by child unless closed.
    Directory,

    /// A regular file; bind mounted.
    File,

    /// A named pipe; bind mounted like a regular file.
    Fifo,

    /// A symbolic link; recreated with the same target.
    Symlink,

    /// A block device; recreated with `mknod`.
    BlockDevice,

    /// A character device with a non-zero device number; recreated with `mknod`.
    CharDevice,

    /// A `0:0` character device or any other unsupported object. Produces nothing.
    Whiteout,
}

/// A layer entry together with the metadata it was classified from.
#[derive(Debug, Getters, CopyGetters)]
pub struct SourceNode {
    /// The path of the entry inside its staged layer.
    #[getset(get = "pub with_prefix")]
    path: PathBuf,

    /// The resolved kind.
    #[getset(get_copy = "pub with_prefix")]
    kind: NodeKind,

    /// The `lstat` result for the entry.
    #[getset(get = "pub with_prefix")]
    metadata: Metadata,
}

/// The merge result recorded for one destination path.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct MergeNode {
    /// The path inside the merge target.
    #[getset(get = "pub with_prefix")]
    destination: PathBuf,

    /// The kind produced by the first layer that reached this path.
    #[getset(get_copy = "pub with_prefix")]
    kind: NodeKind,

    /// Whether the path is closed to children from later layers.
    #[getset(get_copy = "pub with_prefix")]
    ignored: bool,
}

/// Every destination path visited during a run, keyed by path.
///
/// The first layer to reach a path decides its kind; later lookups only read the node or close
/// it with [`NodeRegistry::mark_ignored`].
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<PathBuf, MergeNode>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NodeKind {
    /// Classifies `lstat` metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_fifo() {
            Self::Fifo
        } else if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_block_device() {
            Self::BlockDevice
        } else if file_type.is_char_device() && metadata.rdev() != 0 {
            Self::CharDevice
        } else {
            Self::Whiteout
        }
    }

    /// Returns true for [`NodeKind::Directory`].
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

impl SourceNode {
    /// Inspects `path` without following a trailing symlink.
    pub fn inspect(path: impl Into<PathBuf>) -> MagicMountResult<Self> {
        let path = path.into();
        let metadata = path
            .symlink_metadata()
            .map_err(|source| MagicMountError::Inspect {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            kind: NodeKind::from_metadata(&metadata),
            path,
            metadata,
        })
    }
}

impl MergeNode {
    fn new(destination: PathBuf, kind: NodeKind) -> Self {
        Self {
            destination,
            kind,
            ignored: false,
        }
    }
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node recorded for `destination`.
    pub fn get(&self, destination: &Path) -> Option<&MergeNode> {
        self.nodes.get(destination)
    }

    /// Records `destination` with `kind` unless a node already exists.
    ///
    /// Returns true when this call created the node. An existing node is left untouched.
    pub fn claim(&mut self, destination: &Path, kind: NodeKind) -> bool {
        if self.nodes.contains_key(destination) {
            return false;
        }

        self.nodes.insert(
            destination.to_path_buf(),
            MergeNode::new(destination.to_path_buf(), kind),
        );
        true
    }

    /// Closes `destination` to later layers. Unknown paths are ignored.
    pub fn mark_ignored(&mut self, destination: &Path) {
        if let Some(node) = self.nodes.get_mut(destination) {
            node.ignored = true;
        }
    }

    /// Returns the number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of nodes closed to later layers.
    pub fn ignored_count(&self) -> usize {
        self.nodes.values().filter(|node| node.ignored).count()
    }

    /// Iterates over the recorded nodes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MergeNode> {
        self.nodes.values()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Directory => "DIRECTORY",
            Self::File => "FILE",
            Self::Fifo => "FIFO",
            Self::Symlink => "SYMLINK",
            Self::BlockDevice => "BLOCK",
            Self::CharDevice => "CHAR",
            Self::Whiteout => "WHITEOUT",
        };

        write!(f, "{}", name)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::symlink, os::unix::net::UnixListener};

    use nix::{sys::stat::Mode, unistd};

    use super::*;

    #[test]
    fn test_node_kind_classification() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();

        fs::create_dir(root.join("dir"))?;
        fs::write(root.join("file"), "content")?;
        symlink("file", root.join("link"))?;
        symlink("missing", root.join("dangling"))?;
        unistd::mkfifo(&root.join("fifo"), Mode::from_bits_truncate(0o644))?;
        let _listener = UnixListener::bind(root.join("socket"))?;

        let kind = |name: &str| SourceNode::inspect(root.join(name)).map(|node| node.kind);
        assert_eq!(kind("dir")?, NodeKind::Directory);
        assert_eq!(kind("file")?, NodeKind::File);
        assert_eq!(kind("link")?, NodeKind::Symlink);
        assert_eq!(kind("dangling")?, NodeKind::Symlink);
        assert_eq!(kind("fifo")?, NodeKind::Fifo);
        assert_eq!(kind("socket")?, NodeKind::Whiteout);
        assert!(kind("missing").is_err());

        Ok(())
    }

    #[test]
    fn test_node_kind_char_devices() -> anyhow::Result<()> {
        // /dev/null is 1:3, a real character device.
        let null = Path::new("/dev/null");
        if null.exists() {
            assert_eq!(SourceNode::inspect(null)?.kind, NodeKind::CharDevice);
        }

        Ok(())
    }

    #[test]
    fn test_node_kind_display() {
        assert_eq!(NodeKind::Directory.to_string(), "DIRECTORY");
        assert_eq!(NodeKind::BlockDevice.to_string(), "BLOCK");
        assert_eq!(NodeKind::Whiteout.to_string(), "WHITEOUT");
    }

    #[test]
    fn test_node_registry_first_claim_wins() {
        let mut registry = NodeRegistry::new();
        let path = Path::new("/dev/.workdir_x/0/system/etc");

        assert!(registry.is_empty());
        assert!(registry.claim(path, NodeKind::Directory));
        assert!(!registry.claim(path, NodeKind::File));
        assert!(!registry.claim(path, NodeKind::Whiteout));

        let node = registry.get(path).unwrap();
        assert_eq!(node.get_kind(), NodeKind::Directory);
        assert_eq!(node.get_destination(), path);
        assert!(!node.get_ignored());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_node_registry_mark_ignored() {
        let mut registry = NodeRegistry::new();
        let dir = Path::new("/t/0/a");
        let file = Path::new("/t/0/a/x");
        registry.claim(dir, NodeKind::Directory);
        registry.claim(file, NodeKind::File);

        registry.mark_ignored(dir);
        registry.mark_ignored(dir);
        registry.mark_ignored(Path::new("/t/0/unknown"));

        assert!(registry.get(dir).unwrap().get_ignored());
        assert!(!registry.get(file).unwrap().get_ignored());
        assert_eq!(registry.get(dir).unwrap().get_kind(), NodeKind::Directory);
        assert_eq!(registry.ignored_count(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(Path::new("/t/0/unknown")).is_none());
    }
}

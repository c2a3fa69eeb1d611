//! The recursive layer merge.
//!
//! Layers are merged one at a time, in ascending order, into the same target directory. Every
//! destination path gets exactly one [`MergeNode`](super::MergeNode): the first layer that
//! reaches a path materializes it, and later layers can only add children under a directory that
//! is still open. A path is closed ("ignored") when
//!
//! - two layers disagree about whether it is a directory,
//! - its first directory carries `trusted.overlay.opaque=y`, or
//! - no later layer has a directory there, in which case the whole directory is bind mounted at
//!   once instead of being walked.
//!
//! A whole-directory bind is never taken for the target root, which must stay the merge target's
//! own tmpfs, or for a directory whose subtree holds a whiteout the bind would expose.

use std::{
    fs,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{config::MountConfig, utils, MagicMountError, MagicMountResult};

use super::{materialize, NodeKind, NodeRegistry, SourceNode};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Merges staged layers into a target directory and records what each path became.
#[derive(Debug)]
pub struct MergeEngine<'a> {
    /// The run configuration.
    config: &'a MountConfig,

    /// The staged layer roots; `layers[0]` is layer 1.
    layers: Vec<PathBuf>,

    /// The nodes recorded so far.
    registry: NodeRegistry,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> MergeEngine<'a> {
    /// Creates an engine over the staged layer roots, given in layer order.
    pub fn new(config: &'a MountConfig, layers: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            config,
            layers: layers.into_iter().collect(),
            registry: NodeRegistry::new(),
        }
    }

    /// Returns the nodes recorded so far.
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Consumes the engine and returns its registry.
    pub fn into_registry(self) -> NodeRegistry {
        self.registry
    }

    /// Merges the layer rooted at `layer_root` into `target_root`.
    ///
    /// `layer_index` is the 1-based position of the layer; the unmerged-folder fast path looks at
    /// the staged layers after it. The first failure aborts the call.
    pub fn merge(
        &mut self,
        layer_root: &Path,
        target_root: &Path,
        layer_index: usize,
    ) -> MagicMountResult<()> {
        tracing::info!(
            "merging layer[{}] {} into {}",
            layer_index,
            layer_root.display(),
            target_root.display()
        );

        self.merge_path(layer_root, target_root, Path::new(""), layer_index)
    }

    fn merge_path(
        &mut self,
        source: &Path,
        destination: &Path,
        relative: &Path,
        layer_index: usize,
    ) -> MagicMountResult<()> {
        let source_node = SourceNode::inspect(source)?;

        // A symlink lives on its parent's filesystem, which has already passed the check.
        if !source_node.get_metadata().file_type().is_symlink() {
            if let Ok(Some(fs_type)) = utils::unsupported_filesystem(source) {
                tracing::debug!("record: ignore src=[{}] on {}", source.display(), fs_type);
                return Ok(());
            }
        }

        let first_claim = self.registry.claim(destination, source_node.get_kind());
        if first_claim {
            tracing::debug!(
                "record: src=[{}] type=[{}]",
                source.display(),
                source_node.get_kind()
            );
            materialize::materialize_node(&source_node, destination, self.config.ambient_flags())?;
        }

        let Some(node) = self.registry.get(destination) else {
            return Ok(());
        };

        if node.get_ignored() {
            return Ok(());
        }

        if node.get_kind().is_dir() != source_node.get_kind().is_dir() {
            tracing::debug!(
                "record: src=[{}] type=[{}] clashes with [{}], closing {}",
                source.display(),
                source_node.get_kind(),
                node.get_kind(),
                destination.display()
            );
            self.registry.mark_ignored(destination);
            return Ok(());
        }

        if !utils::is_dir_nofollow(destination) {
            return Ok(());
        }

        // The root is only ever walked; binding over it would let the read-only remount reach
        // the layer's own superblock.
        let is_root = relative.as_os_str().is_empty();

        if is_opaque(source) {
            tracing::debug!("record: src=[{}] marked as trusted opaque", source.display());
            self.registry.mark_ignored(destination);
            if first_claim && !is_root && !has_whiteout(source) {
                return materialize::bind_mount(source, destination, self.config.ambient_flags());
            }
        } else if first_claim
            && !is_root
            && !self.config.get_full_merge()
            && !self.later_layers_have_dir(relative, layer_index)
            && !has_whiteout(source)
        {
            tracing::debug!("record: src=[{}] only in layer[{}]", source.display(), layer_index);
            self.registry.mark_ignored(destination);
            return materialize::bind_mount(source, destination, self.config.ambient_flags());
        }

        let entries = fs::read_dir(source).map_err(|e| MagicMountError::ReadDir {
            path: source.to_path_buf(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| MagicMountError::ReadDir {
                path: source.to_path_buf(),
                source: e,
            })?;

            let name = entry.file_name();
            self.merge_path(
                &source.join(&name),
                &destination.join(&name),
                &relative.join(&name),
                layer_index,
            )?;
        }

        Ok(())
    }

    /// Returns true when any staged layer after `layer_index` has a directory at `relative`.
    fn later_layers_have_dir(&self, relative: &Path, layer_index: usize) -> bool {
        self.layers
            .iter()
            .skip(layer_index)
            .any(|layer_root| utils::is_dir_nofollow(&layer_root.join(relative)))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when any entry below `path` is a whiteout.
///
/// An unreadable entry counts as one, so the directory is walked rather than bound whole.
fn has_whiteout(path: &Path) -> bool {
    WalkDir::new(path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .any(|entry| match entry.and_then(|entry| entry.metadata()) {
            Ok(metadata) => NodeKind::from_metadata(&metadata) == NodeKind::Whiteout,
            Err(_) => true,
        })
}

/// Returns true when `path` carries `trusted.overlay.opaque=y`.
pub fn is_opaque(path: &Path) -> bool {
    matches!(
        xattr::get(path, utils::OPAQUE_XATTR),
        Ok(Some(value)) if value == b"y"
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::{
        fs::{symlink, MetadataExt, PermissionsExt},
        net::UnixListener,
    };

    use crate::mount::NodeKind;

    use super::*;

    /// Builds layers from directories and symlinks only, so they merge without mounting.
    struct Layers {
        _temp_dir: tempfile::TempDir,
        roots: Vec<PathBuf>,
        target: PathBuf,
    }

    impl Layers {
        fn new(count: usize) -> anyhow::Result<Self> {
            let temp_dir = tempfile::tempdir()?;
            let roots = (1..=count)
                .map(|index| temp_dir.path().join(format!("layer{}", index)))
                .collect::<Vec<_>>();
            for root in &roots {
                fs::create_dir(root)?;
            }

            let target = temp_dir.path().join("target");
            fs::create_dir(&target)?;

            Ok(Self {
                _temp_dir: temp_dir,
                roots,
                target,
            })
        }

        fn layer(&self, index: usize) -> &Path {
            &self.roots[index - 1]
        }

        fn merge_all(&self, config: &MountConfig) -> anyhow::Result<NodeRegistry> {
            let mut engine = MergeEngine::new(config, self.roots.clone());
            for (position, root) in self.roots.iter().enumerate() {
                engine.merge(root, &self.target, position + 1)?;
            }

            Ok(engine.into_registry())
        }
    }

    fn full_merge() -> MountConfig {
        MountConfig::builder().full_merge(true).build()
    }

    #[test_log::test]
    fn test_merge_directory_transparency() -> anyhow::Result<()> {
        let layers = Layers::new(2)?;
        fs::create_dir(layers.layer(1).join("a"))?;
        fs::set_permissions(layers.layer(1).join("a"), fs::Permissions::from_mode(0o750))?;
        symlink("x-target", layers.layer(1).join("a/x"))?;
        fs::create_dir(layers.layer(2).join("a"))?;
        fs::set_permissions(layers.layer(2).join("a"), fs::Permissions::from_mode(0o705))?;
        symlink("y-target", layers.layer(2).join("a/y"))?;

        let registry = layers.merge_all(&full_merge())?;

        let a = layers.target.join("a");
        assert_eq!(fs::read_link(a.join("x"))?, Path::new("x-target"));
        assert_eq!(fs::read_link(a.join("y"))?, Path::new("y-target"));
        assert_eq!(fs::metadata(&a)?.mode() & 0o777, 0o750);
        assert_eq!(registry.get(&a).map(|node| node.get_kind()), Some(NodeKind::Directory));
        Ok(())
    }

    #[test]
    fn test_merge_first_layer_wins() -> anyhow::Result<()> {
        let layers = Layers::new(3)?;
        symlink("from-layer-1", layers.layer(1).join("link"))?;
        symlink("from-layer-2", layers.layer(2).join("link"))?;
        symlink("from-layer-3", layers.layer(3).join("link"))?;
        symlink("only-3", layers.layer(3).join("late"))?;

        let registry = layers.merge_all(&full_merge())?;

        assert_eq!(fs::read_link(layers.target.join("link"))?, Path::new("from-layer-1"));
        assert_eq!(fs::read_link(layers.target.join("late"))?, Path::new("only-3"));

        // Root, `link` and `late`.
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.get(&layers.target.join("link")).map(|node| node.get_kind()),
            Some(NodeKind::Symlink)
        );
        Ok(())
    }

    #[test]
    fn test_merge_type_clash_stops_merge() -> anyhow::Result<()> {
        let layers = Layers::new(3)?;
        symlink("layer-1", layers.layer(1).join("b"))?;
        fs::create_dir(layers.layer(2).join("b"))?;
        symlink("child", layers.layer(2).join("b/child"))?;
        fs::create_dir(layers.layer(3).join("b"))?;
        symlink("child", layers.layer(3).join("b/other"))?;

        let registry = layers.merge_all(&full_merge())?;

        let b = layers.target.join("b");
        assert_eq!(fs::read_link(&b)?, Path::new("layer-1"));
        assert!(registry.get(&b.join("child")).is_none());
        assert!(registry.get(&b.join("other")).is_none());
        assert_eq!(registry.get(&b).map(|node| node.get_kind()), Some(NodeKind::Symlink));
        assert_eq!(registry.get(&b).map(|node| node.get_ignored()), Some(true));
        Ok(())
    }

    #[test]
    fn test_merge_type_clash_closes_directory() -> anyhow::Result<()> {
        let layers = Layers::new(3)?;
        fs::create_dir(layers.layer(1).join("d"))?;
        symlink("one", layers.layer(1).join("d/one"))?;
        symlink("not-a-dir", layers.layer(2).join("d"))?;
        fs::create_dir(layers.layer(3).join("d"))?;
        symlink("three", layers.layer(3).join("d/three"))?;

        let registry = layers.merge_all(&full_merge())?;

        let d = layers.target.join("d");
        assert!(d.join("one").symlink_metadata().is_ok());
        assert!(d.join("three").symlink_metadata().is_err());
        assert_eq!(registry.get(&d).map(|node| node.get_ignored()), Some(true));
        Ok(())
    }

    #[test]
    fn test_merge_whiteout_suppression() -> anyhow::Result<()> {
        let layers = Layers::new(2)?;
        let _listener = UnixListener::bind(layers.layer(1).join("w"))?;
        symlink("lower", layers.layer(2).join("w"))?;
        symlink("sibling", layers.layer(1).join("s"))?;

        let registry = layers.merge_all(&full_merge())?;

        assert!(layers.target.join("w").symlink_metadata().is_err());
        assert_eq!(fs::read_link(layers.target.join("s"))?, Path::new("sibling"));
        assert_eq!(
            registry.get(&layers.target.join("w")).map(|node| node.get_kind()),
            Some(NodeKind::Whiteout)
        );
        Ok(())
    }

    #[test]
    fn test_merge_single_writer_per_path() -> anyhow::Result<()> {
        let layers = Layers::new(3)?;
        for index in 1..=3 {
            fs::create_dir_all(layers.layer(index).join("etc/init"))?;
            symlink("shared", layers.layer(index).join("etc/init/shared"))?;
            symlink("own", layers.layer(index).join(format!("etc/own{}", index)))?;
        }

        let registry = layers.merge_all(&full_merge())?;

        // Root, etc, etc/init, etc/init/shared and three etc/own*.
        assert_eq!(registry.len(), 7);
        for index in 1..=3 {
            assert!(layers.target.join(format!("etc/own{}", index)).symlink_metadata().is_ok());
        }
        assert_eq!(registry.ignored_count(), 0);
        Ok(())
    }

    #[test]
    fn test_merge_later_layers_have_dir() -> anyhow::Result<()> {
        let layers = Layers::new(3)?;
        fs::create_dir_all(layers.layer(1).join("shared/dir"))?;
        fs::create_dir_all(layers.layer(1).join("unique"))?;
        fs::create_dir_all(layers.layer(3).join("shared/dir"))?;
        symlink("dir", layers.layer(2).join("unique"))?;
        fs::create_dir_all(layers.layer(2).join("second"))?;

        let config = MountConfig::default();
        let engine = MergeEngine::new(&config, layers.roots.clone());

        assert!(engine.later_layers_have_dir(Path::new("shared/dir"), 1));
        assert!(engine.later_layers_have_dir(Path::new("shared/dir"), 2));
        assert!(!engine.later_layers_have_dir(Path::new("shared/dir"), 3));
        assert!(!engine.later_layers_have_dir(Path::new("unique"), 1));
        assert!(!engine.later_layers_have_dir(Path::new("second"), 2));
        assert!(engine.later_layers_have_dir(Path::new(""), 1));
        assert!(!engine.later_layers_have_dir(Path::new(""), 3));
        Ok(())
    }

    #[test]
    fn test_merge_missing_layer_fails() -> anyhow::Result<()> {
        let layers = Layers::new(1)?;
        let config = full_merge();
        let mut engine = MergeEngine::new(&config, layers.roots.clone());

        let result = engine.merge(&layers.layer(1).join("missing"), &layers.target, 1);
        assert!(matches!(result, Err(MagicMountError::Inspect { .. })));
        Ok(())
    }

    #[test]
    fn test_merge_single_layer_root_is_walked() -> anyhow::Result<()> {
        let layers = Layers::new(1)?;
        symlink("target", layers.layer(1).join("link"))?;
        let _listener = UnixListener::bind(layers.layer(1).join("gone"))?;

        let registry = layers.merge_all(&MountConfig::default())?;

        assert_eq!(fs::read_link(layers.target.join("link"))?, Path::new("target"));
        assert!(layers.target.join("gone").symlink_metadata().is_err());
        assert_eq!(
            registry.get(&layers.target).map(|node| node.get_ignored()),
            Some(false)
        );
        assert_eq!(registry.len(), 3);
        Ok(())
    }

    #[test]
    fn test_merge_whiteout_keeps_unique_directory_walked() -> anyhow::Result<()> {
        let layers = Layers::new(2)?;
        fs::create_dir_all(layers.layer(1).join("only/nested"))?;
        symlink("kept", layers.layer(1).join("only/link"))?;
        let _listener = UnixListener::bind(layers.layer(1).join("only/nested/gone"))?;
        symlink("other", layers.layer(2).join("other"))?;

        let registry = layers.merge_all(&MountConfig::default())?;

        let only = layers.target.join("only");
        assert_eq!(fs::read_link(only.join("link"))?, Path::new("kept"));
        assert!(only.join("nested").is_dir());
        assert!(only.join("nested/gone").symlink_metadata().is_err());
        assert_eq!(registry.get(&only).map(|node| node.get_ignored()), Some(false));
        assert_eq!(
            registry.get(&only.join("nested/gone")).map(|node| node.get_kind()),
            Some(NodeKind::Whiteout)
        );
        assert_eq!(fs::read_link(layers.target.join("other"))?, Path::new("other"));
        Ok(())
    }

    #[test]
    fn test_merge_has_whiteout() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let clean = temp_dir.path().join("clean");
        fs::create_dir_all(clean.join("sub"))?;
        symlink("anything", clean.join("sub/link"))?;
        fs::write(clean.join("file"), "data")?;
        assert!(!has_whiteout(&clean));

        let dirty = temp_dir.path().join("dirty");
        fs::create_dir_all(dirty.join("a/b"))?;
        let _listener = UnixListener::bind(dirty.join("a/b/gone"))?;
        assert!(has_whiteout(&dirty));
        assert!(!has_whiteout(&dirty.join("a/b/gone")));
        Ok(())
    }

    #[test]
    fn test_merge_is_opaque_without_xattr() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        assert!(!is_opaque(temp_dir.path()));
        assert!(!is_opaque(&temp_dir.path().join("missing")));
        Ok(())
    }
}

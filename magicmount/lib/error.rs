use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a magicmount-related operation.
pub type MagicMountResult<T> = Result<T, MagicMountError>;

/// An error that occurred while building or installing a merged mount.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MagicMountError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A system call made through `nix` failed.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    /// The destination directory cannot receive the merged tree.
    #[error("invalid destination {path:?}: {reason}")]
    InvalidDestination {
        /// The destination path as given by the caller.
        path: PathBuf,

        /// Why the destination was rejected.
        reason: String,
    },

    /// A layer cannot be used as a merge source.
    #[error("invalid layer {path:?}: {reason}")]
    InvalidLayer {
        /// The layer path as given by the caller.
        path: PathBuf,

        /// Why the layer was rejected.
        reason: String,
    },

    /// A layer lives on a pseudo filesystem that is never merged.
    #[error("layer {path:?} is on an unsupported filesystem ({fs_type})")]
    UnsupportedFilesystem {
        /// The layer path.
        path: PathBuf,

        /// The name of the filesystem type.
        fs_type: &'static str,
    },

    /// The private workspace could not be created or mounted.
    #[error("unable to set up workspace {path:?}: {source}")]
    WorkspaceSetup {
        /// The workspace path.
        path: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// A layer could not be bind mounted into the workspace.
    #[error("unable to stage layer[{index}] {path:?}: {source}")]
    LayerStaging {
        /// The 1-based layer index.
        index: usize,

        /// The layer path.
        path: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// A path inside a staged layer could not be inspected.
    #[error("unable to inspect {path:?}: {source}")]
    Inspect {
        /// The path that was inspected.
        path: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// A directory inside a staged layer could not be listed.
    #[error("unable to read directory {path:?}: {source}")]
    ReadDir {
        /// The directory that was listed.
        path: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// A single node could not be materialized in the merge target.
    #[error("unable to {operation} {destination:?} <- {source_path:?}: {source}")]
    Materialize {
        /// The operation that failed (`mkdir`, `bind`, `link`, `mknod`).
        operation: &'static str,

        /// The source path inside a staged layer.
        source_path: PathBuf,

        /// The destination path inside the merge target.
        destination: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// Ownership, permissions or the security context could not be copied.
    #[error("unable to clone attributes {destination:?} <- {source_path:?}: {source}")]
    AttributeClone {
        /// The path attributes are read from.
        source_path: PathBuf,

        /// The path attributes are written to.
        destination: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// The merged tree could not be made read-only or moved onto the destination.
    #[error("unable to {operation} {path:?}: {source}")]
    Finalize {
        /// The finalization step that failed.
        operation: &'static str,

        /// The path the step operated on.
        path: PathBuf,

        /// The underlying OS error.
        source: io::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("unable to set up logging: {0}")]
    LogSetup(String),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MagicMountError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MagicMountError {
        MagicMountError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the reason string shown to the user, without the path context.
    pub fn reason(&self) -> String {
        match self {
            Self::WorkspaceSetup { source, .. }
            | Self::LayerStaging { source, .. }
            | Self::Inspect { source, .. }
            | Self::ReadDir { source, .. }
            | Self::Materialize { source, .. }
            | Self::AttributeClone { source, .. }
            | Self::Finalize { source, .. } => source.to_string(),
            Self::InvalidDestination { reason, .. } | Self::InvalidLayer { reason, .. } => {
                reason.clone()
            }
            Self::Io(e) => e.to_string(),
            Self::Nix(e) => e.desc().to_string(),
            _ => self.to_string(),
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `MagicMountResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MagicMountResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SortError {
    #[error("destination {} already exists", destination.display())]
    DestinationCollision { destination: PathBuf },

    #[error("backup of {} failed: {reason}", source_path.display())]
    BackupWriteFailure { source_path: PathBuf, reason: String },

    #[error("rename {} -> {} failed: {reason}", source_path.display(), destination.display())]
    RenameIoFailure {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    #[error("cannot read directory {}: {reason}", directory.display())]
    DirectoryUnreadable { directory: PathBuf, reason: String },

    #[error("invalid naming template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("processing root {} does not exist or is not a directory", root.display())]
    RootNotFound { root: PathBuf },
}

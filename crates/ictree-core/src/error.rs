//! Error types for the IC tree build engine.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for IC tree operations.
pub type IcResult<T> = Result<T, IcError>;

/// External index operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOp {
    /// Creating an empty per-dataset index from its template.
    CreateEmpty,
    /// Building a per-dataset index from a list of stored files.
    BuildFromList,
    /// Attaching a per-dataset index to the master file.
    AttachToMaster,
    /// Verifying an index (checksums, backpointers).
    Verify,
}

impl fmt::Display for AttachOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttachOp::CreateEmpty => "create-empty-index",
            AttachOp::BuildFromList => "build-index-from-file-list",
            AttachOp::AttachToMaster => "attach-child-index-to-master",
            AttachOp::Verify => "verify-index",
        };
        f.write_str(name)
    }
}

/// Error variants for classification, resolution and tree builds.
#[derive(Debug, Error)]
pub enum IcError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is not a single-data-section container, or cannot be decoded.
    #[error("Format error in {}: {reason}", path.display())]
    Format {
        /// The offending file.
        path: PathBuf,
        /// Description, e.g. "too many sections (3)".
        reason: String,
    },

    /// Validity or version metadata is missing or not unique across sections.
    #[error("Inconsistent metadata in {}: {key} {reason}", path.display())]
    InconsistentMetadata {
        /// The offending file.
        path: PathBuf,
        /// Header keyword that could not be resolved.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Files of one dataset class disagree on their version.
    #[error("Version conflict for {class}: found versions {versions:?}")]
    VersionConflict {
        /// The dataset class.
        class: String,
        /// Every distinct version seen, sorted.
        versions: Vec<i64>,
    },

    /// The dataset class has no storage routing.
    #[error("Unknown dataset class: {class}")]
    UnknownDatasetClass {
        /// The unrecognized class name.
        class: String,
    },

    /// An external index operation failed after its retry budget.
    #[error("Attachment error for {class} during {operation}: {cause}")]
    Attachment {
        /// Dataset class being processed.
        class: String,
        /// Operation that failed.
        operation: AttachOp,
        /// Underlying failure.
        cause: String,
    },

    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tree root is locked by another build.
    #[error("Tree lock on {} unavailable: {reason}", path.display())]
    Lock {
        /// Path of the lock file.
        path: PathBuf,
        /// Why the lock could not be taken.
        reason: String,
    },

    /// Time conversion collaborator failed.
    #[error("Time conversion failed for {value}: {reason}")]
    TimeConversion {
        /// Input time value.
        value: f64,
        /// Description of the failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Description of the error.
        reason: String,
    },
}

impl IcError {
    /// Short kind label, used in batch reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IcError::Io(_) => "io",
            IcError::Format { .. } => "format",
            IcError::InconsistentMetadata { .. } => "inconsistent-metadata",
            IcError::VersionConflict { .. } => "version-conflict",
            IcError::UnknownDatasetClass { .. } => "unknown-dataset-class",
            IcError::Attachment { .. } => "attachment",
            IcError::Config(_) => "config",
            IcError::Lock { .. } => "lock",
            IcError::TimeConversion { .. } => "time-conversion",
            IcError::Serialization { .. } => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = IcError::Format {
            path: PathBuf::from("/data/isgr_rise_mod.json"),
            reason: "too many sections (3)".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("isgr_rise_mod.json"));
        assert!(msg.contains("too many sections"));
        assert_eq!(err.kind(), "format");
    }

    #[test]
    fn test_version_conflict_display() {
        let err = IcError::VersionConflict {
            class: "ISGR-RISE-MOD".to_string(),
            versions: vec![1, 2],
        };
        assert_eq!(
            format!("{}", err),
            "Version conflict for ISGR-RISE-MOD: found versions [1, 2]"
        );
    }

    #[test]
    fn test_attachment_error_names_operation() {
        let err = IcError::Attachment {
            class: "ISGR-L2RE-MOD".to_string(),
            operation: AttachOp::AttachToMaster,
            cause: "timed out after 30s".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("attach-child-index-to-master"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IcError = std_err.into();
        assert!(matches!(err, IcError::Io(_)));
        assert_eq!(err.kind(), "io");
    }
}

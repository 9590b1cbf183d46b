//! Contract with the index construction and attachment collaborators.
//!
//! The build engine never edits per-dataset indices or the master's group
//! itself; it asks an [`AttachmentClient`] to. Every call runs under a
//! [`CallPolicy`]: an explicit timeout and at most one retry of a transient
//! failure. Anything still failing becomes [`IcError::Attachment`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::dataset::DatasetClass;
use crate::error::{AttachOp, IcError, IcResult};

/// Whether a collaborator failure may succeed when retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, spawn failures, I/O hiccups.
    Transient,
    /// The collaborator ran and rejected the request.
    Permanent,
}

/// Failure reported by an attachment collaborator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AttachFailure {
    /// Retry classification.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl AttachFailure {
    /// A failure worth one retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// A failure that will not go away on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// True for [`FailureKind::Transient`].
    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<IcError> for AttachFailure {
    fn from(err: IcError) -> Self {
        match err {
            IcError::Io(e) => AttachFailure::transient(e.to_string()),
            other => AttachFailure::permanent(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AttachFailure {
    fn from(err: std::io::Error) -> Self {
        AttachFailure::transient(err.to_string())
    }
}

/// Checks requested from [`AttachmentClient::verify_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Recompute member checksums.
    pub checksums: bool,
    /// Check the index is attached to its master.
    pub backpointers: bool,
    /// Detach members that no longer exist instead of failing.
    pub detach_others: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            checksums: true,
            backpointers: true,
            detach_others: true,
        }
    }
}

/// Authorship cards stamped on every rebuilt per-dataset index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorship {
    /// Value of the `CREATOR` card.
    pub creator: String,
    /// Value of the `CONFIGUR` card.
    pub configuration: String,
}

impl Default for Authorship {
    fn default() -> Self {
        Self {
            creator: "ictree".to_string(),
            configuration: "dev".to_string(),
        }
    }
}

/// Builds, attaches and verifies per-dataset indices of one tree.
#[async_trait]
pub trait AttachmentClient: Send + Sync {
    /// Recreates the empty per-dataset index of `class`.
    async fn create_empty_index(&self, class: &DatasetClass) -> Result<(), AttachFailure>;

    /// Populates the index of `class` with `files`; returns the index path.
    async fn build_index_from_file_list(
        &self,
        class: &DatasetClass,
        files: &[PathBuf],
    ) -> Result<PathBuf, AttachFailure>;

    /// Attaches `child` to the group of `master`.
    async fn attach_child_index_to_master(
        &self,
        master: &Path,
        child: &Path,
    ) -> Result<(), AttachFailure>;

    /// Verifies the index at `index`.
    async fn verify_index(&self, index: &Path, options: VerifyOptions) -> Result<(), AttachFailure>;
}

/// Timeout and retry budget of collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Deadline of a single attempt.
    pub timeout: Duration,
    /// Retry a transient failure once.
    pub retry_transient: bool,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry_transient: true,
        }
    }
}

impl CallPolicy {
    /// Runs `call` under this policy, attributing failures to `class` and `operation`.
    pub async fn run<T, F, Fut>(
        &self,
        class: &DatasetClass,
        operation: AttachOp,
        call: F,
    ) -> IcResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AttachFailure>>,
    {
        let max_attempts = if self.retry_transient { 2 } else { 1 };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AttachFailure::transient(format!(
                    "timed out after {:?}",
                    self.timeout
                ))),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(failure) if failure.is_transient() && attempt < max_attempts => {
                    warn!(
                        class = %class,
                        %operation,
                        attempt,
                        cause = %failure,
                        "transient attachment failure, retrying"
                    );
                }
                Err(failure) => {
                    return Err(IcError::Attachment {
                        class: class.to_string(),
                        operation,
                        cause: failure.message,
                    })
                }
            }
        }
    }
}

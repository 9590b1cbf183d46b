//! Reports returned by batch ingestion, builds and summaries.

use std::fmt;
use std::path::PathBuf;

use crate::dataset::DatasetClass;
use crate::error::IcError;
use crate::master::MasterUpdate;
use crate::revision::Version;

/// Outcome of adding one file in a batch.
#[derive(Debug)]
pub struct ItemOutcome {
    /// File that was offered.
    pub path: PathBuf,
    /// Its dataset class, or why it was refused.
    pub result: Result<DatasetClass, IcError>,
}

/// Per-item outcomes of a batch of `add` calls.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Outcomes in submission order.
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    /// Number of files accepted.
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Refused files with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &IcError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.path, e)))
    }

    /// True when every file was accepted.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Merges `other` after this report's outcomes.
    pub fn extend(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// What a build did for one dataset class.
#[derive(Debug, Clone)]
pub struct ClassReport {
    /// Dataset class.
    pub class: DatasetClass,
    /// Version written to the master.
    pub version: Version,
    /// Distinct stored files, in storage order.
    pub stored: Vec<PathBuf>,
    /// Per-dataset index built.
    pub index: PathBuf,
}

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Master rewrite.
    pub master: MasterUpdate,
    /// Per-class results, in processing order.
    pub classes: Vec<ClassReport>,
    /// Timestamp written to the version stamps.
    pub stamp: String,
}

/// Per-class line of a [`TreeSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSummary {
    /// Dataset class.
    pub class: DatasetClass,
    /// Buffered files.
    pub files: usize,
    /// Bytes stored so far (zero before `build`).
    pub stored_bytes: u64,
}

/// Read-only summary of a builder's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeSummary {
    /// One line per class, in first-seen order.
    pub classes: Vec<ClassSummary>,
}

impl TreeSummary {
    /// Total buffered files.
    pub fn total_files(&self) -> usize {
        self.classes.iter().map(|c| c.files).sum()
    }

    /// Total stored bytes.
    pub fn total_bytes(&self) -> u64 {
        self.classes.iter().map(|c| c.stored_bytes).sum()
    }
}

impl fmt::Display for TreeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.classes {
            writeln!(
                f,
                "{:<20} {:>6} {:>12.5} MiB",
                line.class.as_str(),
                line.files,
                line.stored_bytes as f64 / 1024.0 / 1024.0
            )?;
        }
        Ok(())
    }
}

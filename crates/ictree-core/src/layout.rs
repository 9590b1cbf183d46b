//! On-disk layout of an IC tree.
//!
//! ```text
//! R/<bucket>/<prefix>_<serial:04>.<ext>        stored calibration files
//! R/<bucket>/.version.<prefix>_<serial>.<ext>  content fingerprint sidecars
//! R/idx/ic/<DS>-IDX[_<S>].<ext>                per-dataset indices
//! R/idx/ic/ic_master_file[_<S>].<ext>          master index
//! R/idx/ic/version, R/ic/ibis/version          tree-wide stamps
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::dataset::{DatasetCatalog, DatasetClass, BUCKET_ROOT};
use crate::error::IcResult;
use crate::revision::Serial;

/// Index directory relative to the tree root.
pub const INDEX_DIR: &str = "idx/ic";
/// File stem of the master index.
pub const MASTER_STEM: &str = "ic_master_file";
const STAMP_FILE: &str = "version";
const LOCK_FILE: &str = ".ictree.lock";
const FINGERPRINT_PREFIX: &str = ".version.";

/// Resolves storage, index and master paths for one tree root and suffix.
#[derive(Debug, Clone)]
pub struct TreeLayout {
    root: PathBuf,
    suffix: Option<String>,
    extension: String,
    catalog: Arc<DatasetCatalog>,
}

impl TreeLayout {
    /// Creates a layout; an empty suffix is the same as no suffix.
    pub fn new(
        root: impl Into<PathBuf>,
        suffix: Option<&str>,
        extension: &str,
        catalog: Arc<DatasetCatalog>,
    ) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.filter(|s| !s.is_empty()).map(str::to_string),
            extension: extension.to_string(),
            catalog,
        }
    }

    /// Tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Suffix label of this tree, if any.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// The dataset catalog used for routing.
    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    fn suffixed(&self, stem: &str) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}_{}.{}", stem, suffix, self.extension),
            None => format!("{}.{}", stem, self.extension),
        }
    }

    /// Directory of the bucket `class` is stored in.
    pub fn bucket_dir(&self, class: &DatasetClass) -> IcResult<PathBuf> {
        let bucket = self.catalog.bucket(class)?;
        Ok(self.root.join(bucket.relative_dir()))
    }

    /// Storage path of the file of `class` with `serial`.
    pub fn storage_path(&self, class: &DatasetClass, serial: Serial) -> IcResult<PathBuf> {
        let path = self.bucket_dir(class)?.join(format!(
            "{}_{}.{}",
            class.file_prefix(),
            serial,
            self.extension
        ));
        debug!(class = %class, %serial, path = %path.display(), "storage path");
        Ok(path)
    }

    /// Fingerprint sidecar colocated with a stored file.
    pub fn fingerprint_path(stored: &Path) -> PathBuf {
        let name = stored
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        stored.with_file_name(format!("{}{}", FINGERPRINT_PREFIX, name))
    }

    /// Directory holding the master and per-dataset indices.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    /// Per-dataset index of `class`.
    pub fn index_path(&self, class: &DatasetClass) -> PathBuf {
        self.index_dir()
            .join(self.suffixed(&format!("{}-IDX", class.as_str())))
    }

    /// Template name the external index tools create `class` indices from.
    pub fn index_template(class: &DatasetClass) -> String {
        format!("{}-IDX.tpl", class.as_str())
    }

    /// Master index of this tree.
    pub fn master_path(&self) -> PathBuf {
        self.index_dir().join(self.suffixed(MASTER_STEM))
    }

    /// Unsuffixed master index of the same root.
    pub fn base_master_path(&self) -> PathBuf {
        self.index_dir()
            .join(format!("{}.{}", MASTER_STEM, self.extension))
    }

    /// Master column holding the version of `class`.
    pub fn column_mnemonic(class: &DatasetClass) -> String {
        class.column_mnemonic()
    }

    /// Version stamp in the index directory.
    pub fn index_stamp_path(&self) -> PathBuf {
        self.index_dir().join(STAMP_FILE)
    }

    /// Version stamp in the bucket root.
    pub fn bucket_stamp_path(&self) -> PathBuf {
        self.root.join(BUCKET_ROOT).join(STAMP_FILE)
    }

    /// Lock file guarding builds of this root.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Converts `path` to a path relative to the tree root when it lies inside it.
    pub fn relative_to_root(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

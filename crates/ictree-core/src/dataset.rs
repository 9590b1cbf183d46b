//! Dataset classes and the closed catalog that routes them to storage buckets.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IcError, IcResult};

/// Identifier of a category of calibration data, e.g. `ISGR-RISE-MOD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetClass(String);

impl DatasetClass {
    /// Wraps a class name as read from a section's `EXTNAME`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The class name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mnemonic used for stored file names: `ISGR-ARF.-RSP` -> `isgr_arf_rsp`.
    pub fn file_prefix(&self) -> String {
        self.0.to_lowercase().replace('-', "_").replace('.', "")
    }

    /// Mnemonic used as the master column name: `ISGR-ARF.-RSP` -> `ISGR_ARF_RSP`.
    pub fn column_mnemonic(&self) -> String {
        self.0.replace('-', "_").replace('.', "")
    }

    fn validate(&self) -> IcResult<()> {
        let well_formed = !self.0.is_empty()
            && self.0.chars().all(|c| {
                c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_')
            });
        if well_formed {
            Ok(())
        } else {
            Err(IcError::Config(format!(
                "malformed dataset class name in catalog: {:?}",
                self.0
            )))
        }
    }
}

impl fmt::Display for DatasetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared kind of a dataset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Instrument response functions.
    Response,
    /// Instrument models and correction tables.
    Model,
}

impl DatasetKind {
    /// Bucket a class of this kind is stored in unless overridden.
    pub fn default_bucket(self) -> StorageBucket {
        match self {
            DatasetKind::Response => StorageBucket::IbisResponse,
            DatasetKind::Model => StorageBucket::IbisModel,
        }
    }
}

/// Storage directory for calibration files, relative to the tree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBucket {
    /// `ic/ibis/rsp`
    IbisResponse,
    /// `ic/ibis/mod`
    IbisModel,
}

/// Directory holding every bucket; carries the tree-wide `version` stamp.
pub const BUCKET_ROOT: &str = "ic/ibis";

impl StorageBucket {
    /// Relative directory of the bucket.
    pub fn relative_dir(self) -> &'static str {
        match self {
            StorageBucket::IbisResponse => "ic/ibis/rsp",
            StorageBucket::IbisModel => "ic/ibis/mod",
        }
    }
}

/// A catalog declaration for one dataset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Class name.
    pub name: String,
    /// Declared kind.
    pub kind: DatasetKind,
    /// Explicit bucket, overriding the kind's default.
    #[serde(default)]
    pub bucket: Option<StorageBucket>,
}

impl DatasetSpec {
    /// Declares `name` with `kind`, routed to the kind's default bucket.
    pub fn new(name: &str, kind: DatasetKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            bucket: None,
        }
    }

    /// Routes the class to an explicit bucket.
    pub fn routed_to(mut self, bucket: StorageBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }
}

/// Closed, validated mapping from dataset class to storage bucket.
#[derive(Debug, Clone)]
pub struct DatasetCatalog {
    entries: HashMap<DatasetClass, (DatasetKind, StorageBucket)>,
}

impl DatasetCatalog {
    /// Builds a catalog, rejecting duplicate or malformed class names.
    pub fn new(specs: impl IntoIterator<Item = DatasetSpec>) -> IcResult<Self> {
        let mut entries = HashMap::new();
        for spec in specs {
            let class = DatasetClass::new(spec.name);
            class.validate()?;
            let bucket = spec.bucket.unwrap_or_else(|| spec.kind.default_bucket());
            if entries.insert(class.clone(), (spec.kind, bucket)).is_some() {
                return Err(IcError::Config(format!(
                    "dataset class declared twice in catalog: {}",
                    class
                )));
            }
        }
        debug!(classes = entries.len(), "dataset catalog validated");
        Ok(Self { entries })
    }

    /// The IBIS/ISGRI classes known to the IC tree.
    pub fn builtin_specs() -> Vec<DatasetSpec> {
        use DatasetKind::{Model, Response};
        vec![
            DatasetSpec::new("ISGR-RISE-MOD", Model),
            DatasetSpec::new("ISGR-L2RE-MOD", Model),
            DatasetSpec::new("ISGR-MCEC-MOD", Model),
            DatasetSpec::new("ISGR-EFFC-MOD", Model),
            DatasetSpec::new("ISGR-LUT2-MOD", Model),
            DatasetSpec::new("ISGR-GAIN-MOD", Model),
            DatasetSpec::new("ISGR-OFFS-MOD", Model),
            DatasetSpec::new("ISGR-EBDS-MOD", Model).routed_to(StorageBucket::IbisResponse),
            DatasetSpec::new("ISGR-ARF.-RSP", Response),
            DatasetSpec::new("ISGR-RMF.-RSP", Response),
        ]
    }

    /// The built-in catalog.
    pub fn builtin() -> IcResult<Self> {
        Self::new(Self::builtin_specs())
    }

    /// The built-in catalog extended with extra declarations.
    pub fn builtin_with(extra: impl IntoIterator<Item = DatasetSpec>) -> IcResult<Self> {
        Self::new(Self::builtin_specs().into_iter().chain(extra))
    }

    /// Storage bucket for `class`; unknown classes fail fast.
    pub fn bucket(&self, class: &DatasetClass) -> IcResult<StorageBucket> {
        self.entries
            .get(class)
            .map(|(_, bucket)| *bucket)
            .ok_or_else(|| IcError::UnknownDatasetClass {
                class: class.to_string(),
            })
    }

    /// Declared kind of `class`.
    pub fn kind(&self, class: &DatasetClass) -> IcResult<DatasetKind> {
        self.entries
            .get(class)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| IcError::UnknownDatasetClass {
                class: class.to_string(),
            })
    }

    /// True when `class` is declared.
    pub fn contains(&self, class: &DatasetClass) -> bool {
        self.entries.contains_key(class)
    }

    /// Number of declared classes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no class is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

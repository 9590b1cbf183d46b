//! Table container model and the codec that reads and writes it.
//!
//! A container is an ordered list of sections. Section 0 is the primary
//! container; every following section is a structural data section carrying
//! header cards and, optionally, a table of columns and rows. The on-disk
//! encoding is owned by a [`ContainerCodec`]; the bundled [`JsonContainerCodec`]
//! stores each container as one JSON document.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IcError, IcResult};

/// Header keyword naming a section.
pub const EXTNAME: &str = "EXTNAME";

/// A header card value or a table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Logical value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Character string.
    Text(String),
}

impl HeaderValue {
    /// Returns the value as an integer, accepting integral floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Bool(v) => write!(f, "{}", if *v { "T" } else { "F" }),
            HeaderValue::Int(v) => write!(f, "{}", v),
            HeaderValue::Float(v) => write!(f, "{}", v),
            HeaderValue::Text(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Text(v)
    }
}

/// A table column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column format code, e.g. `1I` for a 16-bit integer.
    pub format: String,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
        }
    }
}

/// One table row keyed by column name.
pub type Row = BTreeMap<String, HeaderValue>;

/// A structural section: header cards plus an optional table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Header cards.
    #[serde(default)]
    pub header: BTreeMap<String, HeaderValue>,
    /// Table columns, empty for non-table sections.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// Table rows.
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Section {
    /// Creates an empty section with the given `EXTNAME`.
    pub fn named(extname: &str) -> Self {
        let mut section = Self::default();
        section.set_header(EXTNAME, extname);
        section
    }

    /// Returns the `EXTNAME` card, if present.
    pub fn extname(&self) -> Option<&str> {
        self.header.get(EXTNAME).and_then(HeaderValue::as_str)
    }

    /// Returns a header card.
    pub fn header_value(&self, key: &str) -> Option<&HeaderValue> {
        self.header.get(key)
    }

    /// Sets a header card, replacing any previous value.
    pub fn set_header(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.header.insert(key.to_string(), value.into());
    }

    /// Returns true when a column of this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Rewrites the structural cards from the current columns and rows.
    pub fn recompute_structure(&mut self) {
        self.header.retain(|k, _| !is_structural_key(k));
        if self.columns.is_empty() {
            return;
        }
        self.header
            .insert("NAXIS2".to_string(), HeaderValue::Int(self.rows.len() as i64));
        self.header.insert(
            "TFIELDS".to_string(),
            HeaderValue::Int(self.columns.len() as i64),
        );
        for (i, column) in self.columns.iter().enumerate() {
            self.header
                .insert(format!("TTYPE{}", i + 1), column.name.as_str().into());
            self.header
                .insert(format!("TFORM{}", i + 1), column.format.as_str().into());
        }
    }
}

/// True for header cards derived from the table structure.
pub fn is_structural_key(key: &str) -> bool {
    key.starts_with("TFORM")
        || key.starts_with("TTYPE")
        || key.starts_with("TFIELDS")
        || key.starts_with("NAXIS")
}

/// An ordered collection of sections; section 0 is the primary container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// All sections, primary first.
    pub sections: Vec<Section>,
}

impl Container {
    /// Creates a container holding only an empty primary section.
    pub fn new() -> Self {
        Self {
            sections: vec![Section::default()],
        }
    }

    /// Creates a container with one data section after the primary.
    pub fn with_data_section(section: Section) -> Self {
        Self {
            sections: vec![Section::default(), section],
        }
    }

    /// Number of data sections beyond the primary container.
    pub fn data_section_count(&self) -> usize {
        self.sections.len().saturating_sub(1)
    }

    /// Every value of `key` across all sections that carry it, in section order.
    pub fn header_values(&self, key: &str) -> Vec<&HeaderValue> {
        self.sections
            .iter()
            .filter_map(|s| s.header_value(key))
            .collect()
    }
}

/// Reads and writes containers in one concrete on-disk encoding.
pub trait ContainerCodec: Send + Sync {
    /// File extension (without dot) used for files in this encoding.
    fn extension(&self) -> &str;

    /// Decodes the container stored at `path`.
    fn read(&self, path: &Path) -> IcResult<Container>;

    /// Encodes `container` to `path`, replacing any existing file atomically.
    fn write(&self, path: &Path, container: &Container) -> IcResult<()>;
}

/// Codec storing a container as a pretty-printed JSON document.
#[derive(Debug, Clone, Default)]
pub struct JsonContainerCodec;

impl JsonContainerCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl ContainerCodec for JsonContainerCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn read(&self, path: &Path) -> IcResult<Container> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| IcError::Format {
            path: path.to_path_buf(),
            reason: format!("undecodable container: {}", e),
        })
    }

    fn write(&self, path: &Path, container: &Container) -> IcResult<()> {
        let mut normalized = container.clone();
        for section in &mut normalized.sections {
            section.recompute_structure();
        }
        let bytes = serde_json::to_vec_pretty(&normalized).map_err(|e| IcError::Serialization {
            reason: e.to_string(),
        })?;
        write_atomic(path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "container written");
        Ok(())
    }
}

/// Writes `bytes` to a temporary sibling of `path` and renames it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> IcResult<()> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IcError::Io(e.error))?;
    Ok(())
}

//! Master index synthesis.
//!
//! The master file carries one row in its version table: one integer column
//! per dataset class holding the version selected for this tree. Columns are
//! only ever appended; a build rewrites the row values for the classes it
//! carries and leaves every other column untouched.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::container::{ColumnDef, ContainerCodec, HeaderValue, Row, Section};
use crate::dataset::DatasetClass;
use crate::error::{IcError, IcResult};
use crate::layout::TreeLayout;
use crate::revision::Version;

/// Section of the master file children indices are attached to.
pub const MASTER_GROUP_SECTION: usize = 2;
/// Section of the master file holding the version table.
pub const MASTER_TABLE_SECTION: usize = 3;
/// Column format of version columns.
pub const VERSION_COLUMN_FORMAT: &str = "1I";

/// Outcome of a master rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterUpdate {
    /// Master file written.
    pub path: PathBuf,
    /// Column count before the rewrite.
    pub columns_before: usize,
    /// Column count after the rewrite.
    pub columns_after: usize,
    /// Columns appended by this rewrite.
    pub added_columns: Vec<String>,
    /// Version written per class.
    pub versions: Vec<(DatasetClass, Version)>,
}

/// Extends the master schema and writes the resolved version row.
#[derive(Clone)]
pub struct MasterIndexSynthesizer {
    codec: Arc<dyn ContainerCodec>,
}

impl MasterIndexSynthesizer {
    /// Creates a synthesizer reading and writing through `codec`.
    pub fn new(codec: Arc<dyn ContainerCodec>) -> Self {
        Self { codec }
    }

    /// Checks that every class has exactly one version and returns it.
    pub fn resolve_versions(
        classes: &[(DatasetClass, Vec<Version>)],
    ) -> IcResult<Vec<(DatasetClass, Version)>> {
        classes
            .iter()
            .map(|(class, versions)| {
                let mut distinct = versions.clone();
                distinct.sort();
                distinct.dedup();
                match distinct.as_slice() {
                    [single] => Ok((class.clone(), *single)),
                    _ => Err(IcError::VersionConflict {
                        class: class.to_string(),
                        versions: distinct.iter().map(|v| v.0).collect(),
                    }),
                }
            })
            .collect()
    }

    /// Rewrites the master of `layout` for `classes`.
    ///
    /// Versions are validated before anything is read or written; on a
    /// conflict the master is left untouched.
    pub fn init(
        &self,
        layout: &TreeLayout,
        classes: &[(DatasetClass, Vec<Version>)],
    ) -> IcResult<MasterUpdate> {
        let versions = Self::resolve_versions(classes)?;

        let target = layout.master_path();
        let source = if target.exists() {
            target.clone()
        } else if layout.suffix().is_some() && layout.base_master_path().exists() {
            info!(
                base = %layout.base_master_path().display(),
                "seeding suffixed master from base master"
            );
            layout.base_master_path()
        } else {
            return Err(IcError::Config(format!(
                "no master index to extend at {}",
                target.display()
            )));
        };

        let mut master = self.codec.read(&source)?;
        if master.sections.len() <= MASTER_TABLE_SECTION {
            return Err(IcError::Format {
                path: source,
                reason: format!(
                    "master has {} sections, version table expected at {}",
                    master.sections.len(),
                    MASTER_TABLE_SECTION
                ),
            });
        }

        let table = &master.sections[MASTER_TABLE_SECTION];
        let columns_before = table.columns.len();
        info!(columns = columns_before, "master index starts with columns");
        debug!(columns = ?table.columns.iter().map(|c| &c.name).collect::<Vec<_>>());

        let mut extended = Section {
            header: table.header.clone(),
            columns: table.columns.clone(),
            rows: table.rows.clone(),
        };
        extended.recompute_structure();

        let mut added_columns = Vec::new();
        for (class, _) in &versions {
            let column = TreeLayout::column_mnemonic(class);
            if !extended.has_column(&column) {
                extended
                    .columns
                    .push(ColumnDef::new(column.clone(), VERSION_COLUMN_FORMAT));
                added_columns.push(column);
            }
        }

        if extended.rows.is_empty() {
            extended.rows.push(Row::new());
        }
        for (class, version) in &versions {
            extended.rows[0].insert(
                TreeLayout::column_mnemonic(class),
                HeaderValue::Int(version.0),
            );
        }
        extended.recompute_structure();

        let columns_after = extended.columns.len();
        master.sections[MASTER_TABLE_SECTION] = extended;
        self.codec.write(&target, &master)?;
        info!(
            columns = columns_after,
            added = added_columns.len(),
            path = %target.display(),
            "master index complete with columns"
        );

        Ok(MasterUpdate {
            path: target,
            columns_before,
            columns_after,
            added_columns,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, JsonContainerCodec};
    use crate::dataset::DatasetCatalog;

    fn baseline_master() -> Container {
        let mut table = Section::named("IC-MASTER-TABLE");
        table.columns.push(ColumnDef::new("ISGR_RISE_MOD", "1I"));
        table.columns.push(ColumnDef::new("SPI_GAIN_MOD", "1I"));
        table.rows.push(Row::from([
            ("ISGR_RISE_MOD".to_string(), HeaderValue::Int(2)),
            ("SPI_GAIN_MOD".to_string(), HeaderValue::Int(5)),
        ]));
        table.set_header("ORIGIN", "ISDC");
        table.set_header("TTYPE7", "STALE");
        Container {
            sections: vec![
                Section::default(),
                Section::named("IC-MASTER-ALIAS"),
                Section::named("GROUPING"),
                table,
            ],
        }
    }

    fn setup(suffix: Option<&str>) -> (tempfile::TempDir, TreeLayout, MasterIndexSynthesizer) {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(JsonContainerCodec::new());
        let layout = TreeLayout::new(
            dir.path(),
            suffix,
            "json",
            Arc::new(DatasetCatalog::builtin().unwrap()),
        );
        codec
            .write(&layout.base_master_path(), &baseline_master())
            .unwrap();
        (dir, layout, MasterIndexSynthesizer::new(codec))
    }

    #[test]
    fn test_resolve_versions_detects_conflict() {
        let classes = vec![(
            DatasetClass::new("ISGR-RISE-MOD"),
            vec![Version(1), Version(2), Version(1)],
        )];
        let err = MasterIndexSynthesizer::resolve_versions(&classes).unwrap_err();
        match err {
            IcError::VersionConflict { versions, .. } => assert_eq!(versions, vec![1, 2]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_init_appends_missing_columns_only() {
        let (_dir, layout, synth) = setup(None);
        let classes = vec![
            (DatasetClass::new("ISGR-RISE-MOD"), vec![Version(1), Version(1)]),
            (DatasetClass::new("ISGR-L2RE-MOD"), vec![Version(3)]),
        ];
        let update = synth.init(&layout, &classes).unwrap();

        assert_eq!(update.columns_before, 2);
        assert_eq!(update.columns_after, 3);
        assert_eq!(update.added_columns, vec!["ISGR_L2RE_MOD".to_string()]);

        let master = JsonContainerCodec::new().read(&layout.master_path()).unwrap();
        let table = &master.sections[MASTER_TABLE_SECTION];
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0]["ISGR_RISE_MOD"], HeaderValue::Int(1));
        assert_eq!(table.rows[0]["ISGR_L2RE_MOD"], HeaderValue::Int(3));
        assert_eq!(table.rows[0]["SPI_GAIN_MOD"], HeaderValue::Int(5));
        assert_eq!(table.header_value("ORIGIN"), Some(&HeaderValue::from("ISDC")));
        assert!(table.header_value("TTYPE7").is_none());
        assert_eq!(table.header_value("TFIELDS"), Some(&HeaderValue::Int(3)));
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_dir, layout, synth) = setup(None);
        let classes = vec![(DatasetClass::new("ISGR-MCEC-MOD"), vec![Version(1)])];
        synth.init(&layout, &classes).unwrap();
        let second = synth.init(&layout, &classes).unwrap();

        assert!(second.added_columns.is_empty());
        assert_eq!(second.columns_before, second.columns_after);
    }

    #[test]
    fn test_conflict_leaves_master_untouched() {
        let (_dir, layout, synth) = setup(None);
        let before = std::fs::read(layout.master_path()).unwrap();
        let classes = vec![(
            DatasetClass::new("ISGR-RISE-MOD"),
            vec![Version(1), Version(2)],
        )];
        assert!(synth.init(&layout, &classes).is_err());
        assert_eq!(std::fs::read(layout.master_path()).unwrap(), before);
    }

    #[test]
    fn test_suffixed_master_seeded_from_base() {
        let (_dir, layout, synth) = setup(Some("alt"));
        let classes = vec![(DatasetClass::new("ISGR-EFFC-MOD"), vec![Version(4)])];
        let update = synth.init(&layout, &classes).unwrap();

        assert!(update.path.ends_with("ic_master_file_alt.json"));
        let base = JsonContainerCodec::new()
            .read(&layout.base_master_path())
            .unwrap();
        assert!(!base.sections[MASTER_TABLE_SECTION].has_column("ISGR_EFFC_MOD"));
    }

    #[test]
    fn test_missing_master_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TreeLayout::new(
            dir.path(),
            None,
            "json",
            Arc::new(DatasetCatalog::builtin().unwrap()),
        );
        let synth = MasterIndexSynthesizer::new(Arc::new(JsonContainerCodec::new()));
        let classes = vec![(DatasetClass::new("ISGR-RISE-MOD"), vec![Version(1)])];
        assert!(matches!(
            synth.init(&layout, &classes).unwrap_err(),
            IcError::Config(_)
        ));
    }
}

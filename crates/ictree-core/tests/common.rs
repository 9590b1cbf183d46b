//! Common fixtures for tree build integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ictree_core::{
    AttachFailure, AttachmentClient, BuildOptions, CallPolicy, Container, ContainerCodec,
    DatasetCatalog, DatasetClass, HeaderValue, IndexTreeBuilder, JsonContainerCodec,
    LinearRevisionClock, NativeIndexClient, Section, TreeCollection, TreeLayout, VerifyOptions,
};
use ictree_core::container::{ColumnDef, Row};
use ictree_core::master::MASTER_TABLE_SECTION;
use ictree_core::revision::{VERSION, VSTART, VSTOP};
use tempfile::TempDir;

/// A collection with a `bare` base tree and a directory of input files.
pub struct TestCollection {
    pub dir: TempDir,
    pub collection: TreeCollection,
    pub inputs: PathBuf,
}

impl TestCollection {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let collection = TreeCollection::new(dir.path().join("ic_collection"));
        let inputs = dir.path().join("inputs");
        std::fs::create_dir_all(&inputs).unwrap();

        let bare = collection.tree_path("bare");
        codec()
            .write(&collection.master_path("bare", "json"), &base_master())
            .unwrap();
        std::fs::create_dir_all(bare.join("ic/ibis/mod")).unwrap();

        Self {
            dir,
            collection,
            inputs,
        }
    }

    /// Clones `bare` into a new tree version and returns its root.
    pub fn fresh_tree(&self, name: &str) -> PathBuf {
        let root = self.collection.tree_path(name);
        TreeCollection::clone_tree(&self.collection.tree_path("bare"), &root).unwrap();
        root
    }

    /// Writes an input file whose validity starts in `revision`.
    pub fn input(&self, name: &str, class: &str, revision: i64, version: i64) -> PathBuf {
        let mut data = Section::named(class);
        data.set_header(VSTART, revision as f64 + 0.5);
        data.set_header(VSTOP, revision as f64 + 3.0);
        data.set_header(VERSION, version);
        data.columns.push(ColumnDef::new("ENERGY", "1E"));
        data.rows.push(Row::from([(
            "ENERGY".to_string(),
            HeaderValue::Float(15.0 + revision as f64),
        )]));
        let path = self.inputs.join(name);
        codec()
            .write(&path, &Container::with_data_section(data))
            .unwrap();
        path
    }
}

pub fn codec() -> Arc<dyn ContainerCodec> {
    Arc::new(JsonContainerCodec::new())
}

/// One revision per day from IJD 0, so `revision + 0.5` lands in `revision`.
pub fn unit_clock() -> LinearRevisionClock {
    LinearRevisionClock {
        epoch_ijd: 0.0,
        period_days: 1.0,
    }
}

/// Master with an alias section, an empty group and a one-column version table.
pub fn base_master() -> Container {
    let mut table = Section::named("IC-MASTER-TABLE");
    table.columns.push(ColumnDef::new("SPI_GAIN_MOD", "1I"));
    table.rows.push(Row::from([(
        "SPI_GAIN_MOD".to_string(),
        HeaderValue::Int(4),
    )]));
    Container {
        sections: vec![
            Section::default(),
            Section::named("IC-MASTER-ALIAS"),
            Section::named("GROUPING"),
            table,
        ],
    }
}

pub fn layout(root: &Path, suffix: Option<&str>) -> TreeLayout {
    TreeLayout::new(
        root,
        suffix,
        "json",
        Arc::new(DatasetCatalog::builtin().unwrap()),
    )
}

pub fn options() -> BuildOptions {
    BuildOptions {
        policy: CallPolicy {
            timeout: std::time::Duration::from_secs(10),
            retry_transient: true,
        },
        ..BuildOptions::default()
    }
}

pub fn native_builder(root: &Path, suffix: Option<&str>) -> IndexTreeBuilder {
    let layout = layout(root, suffix);
    let client = Arc::new(NativeIndexClient::new(
        codec(),
        layout.clone(),
        Default::default(),
    ));
    IndexTreeBuilder::new(layout, codec(), Arc::new(unit_clock()), client, options())
}

pub fn builder_with(root: &Path, client: Arc<dyn AttachmentClient>) -> IndexTreeBuilder {
    IndexTreeBuilder::new(layout(root, None), codec(), Arc::new(unit_clock()), client, options())
}

/// Version table row of a tree's master.
pub fn master_row(master: &Path) -> (Vec<String>, Row) {
    let container = codec().read(master).unwrap();
    let table = &container.sections[MASTER_TABLE_SECTION];
    let columns = table.columns.iter().map(|c| c.name.clone()).collect();
    (columns, table.rows[0].clone())
}

/// Member locations of a per-dataset index, sorted.
pub fn index_members(index: &Path) -> Vec<String> {
    let container = codec().read(index).unwrap();
    let mut members: Vec<String> = container.sections[1]
        .rows
        .iter()
        .filter_map(|row| row.get("MEMBER_LOCATION").and_then(HeaderValue::as_str))
        .map(str::to_string)
        .collect();
    members.sort();
    members
}

/// Native client that fails one operation for one class.
pub struct FailingClient {
    pub inner: NativeIndexClient,
    pub fail_class: DatasetClass,
    pub transient: bool,
}

impl FailingClient {
    fn failure(&self) -> AttachFailure {
        if self.transient {
            AttachFailure::transient("index service unreachable")
        } else {
            AttachFailure::permanent("dal_attach exited with status 1")
        }
    }
}

#[async_trait]
impl AttachmentClient for FailingClient {
    async fn create_empty_index(&self, class: &DatasetClass) -> Result<(), AttachFailure> {
        self.inner.create_empty_index(class).await
    }

    async fn build_index_from_file_list(
        &self,
        class: &DatasetClass,
        files: &[PathBuf],
    ) -> Result<PathBuf, AttachFailure> {
        self.inner.build_index_from_file_list(class, files).await
    }

    async fn attach_child_index_to_master(
        &self,
        master: &Path,
        child: &Path,
    ) -> Result<(), AttachFailure> {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with(&format!("{}-IDX", self.fail_class.as_str())) {
            return Err(self.failure());
        }
        self.inner.attach_child_index_to_master(master, child).await
    }

    async fn verify_index(&self, index: &Path, options: VerifyOptions) -> Result<(), AttachFailure> {
        self.inner.verify_index(index, options).await
    }
}

//! In-process attachment client working directly on containers.
//!
//! Index rows reference members by their path relative to the tree root so a
//! cloned tree stays self-consistent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::attach::{AttachFailure, AttachmentClient, Authorship, VerifyOptions};
use crate::container::{ColumnDef, Container, ContainerCodec, HeaderValue, Row, Section};
use crate::dataset::DatasetClass;
use crate::layout::TreeLayout;
use crate::master::MASTER_GROUP_SECTION;
use crate::revision::{unique_key, VERSION, VSTART, VSTOP};

/// Column holding a member's location.
pub const MEMBER_LOCATION: &str = "MEMBER_LOCATION";
/// Column holding a member's section name.
pub const MEMBER_NAME: &str = "MEMBER_NAME";
/// Column holding a member's BLAKE3 checksum.
pub const CHECKSUM: &str = "CHECKSUM";
/// Card naming the master an index is attached to.
pub const PARENT: &str = "PARENT";

/// Attachment client that maintains indices through a [`ContainerCodec`].
#[derive(Clone)]
pub struct NativeIndexClient {
    codec: Arc<dyn ContainerCodec>,
    layout: TreeLayout,
    authorship: Authorship,
}

impl NativeIndexClient {
    /// Creates a client for the tree described by `layout`.
    pub fn new(codec: Arc<dyn ContainerCodec>, layout: TreeLayout, authorship: Authorship) -> Self {
        Self {
            codec,
            layout,
            authorship,
        }
    }

    fn empty_index(class: &DatasetClass) -> Container {
        let mut section = Section::named(&format!("{}-IDX", class.as_str()));
        section.columns = vec![
            ColumnDef::new(MEMBER_LOCATION, "256A"),
            ColumnDef::new(VERSION, "1I"),
            ColumnDef::new(VSTART, "1D"),
            ColumnDef::new(VSTOP, "1D"),
            ColumnDef::new(CHECKSUM, "64A"),
        ];
        Container::with_data_section(section)
    }

    fn member_row(&self, file: &Path) -> Result<Row, AttachFailure> {
        let member = self.codec.read(file)?;
        let mut row = Row::new();
        row.insert(
            MEMBER_LOCATION.to_string(),
            location_value(&self.layout, file),
        );
        for key in [VERSION, VSTART, VSTOP] {
            row.insert(key.to_string(), unique_key(file, &member, key)?);
        }
        row.insert(CHECKSUM.to_string(), HeaderValue::Text(checksum(file)?));
        Ok(row)
    }
}

fn location_value(layout: &TreeLayout, file: &Path) -> HeaderValue {
    HeaderValue::Text(layout.relative_to_root(file).to_string_lossy().into_owned())
}

fn checksum(file: &Path) -> Result<String, AttachFailure> {
    let bytes = std::fs::read(file)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn index_section<'a>(
    index: &Path,
    container: &'a mut Container,
) -> Result<&'a mut Section, AttachFailure> {
    container.sections.get_mut(1).ok_or_else(|| {
        AttachFailure::permanent(format!("{} has no index section", index.display()))
    })
}

#[async_trait]
impl AttachmentClient for NativeIndexClient {
    async fn create_empty_index(&self, class: &DatasetClass) -> Result<(), AttachFailure> {
        let path = self.layout.index_path(class);
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed previous index");
        }
        self.codec.write(&path, &Self::empty_index(class))?;
        Ok(())
    }

    async fn build_index_from_file_list(
        &self,
        class: &DatasetClass,
        files: &[PathBuf],
    ) -> Result<PathBuf, AttachFailure> {
        let path = self.layout.index_path(class);
        let mut index = if path.exists() {
            self.codec.read(&path)?
        } else {
            Self::empty_index(class)
        };

        let mut rows = Vec::with_capacity(files.len());
        for file in files {
            rows.push(self.member_row(file)?);
        }

        let section = index_section(&path, &mut index)?;
        for row in rows {
            let location = row.get(MEMBER_LOCATION).cloned();
            match section
                .rows
                .iter_mut()
                .find(|existing| existing.get(MEMBER_LOCATION) == location.as_ref())
            {
                Some(existing) => *existing = row,
                None => section.rows.push(row),
            }
        }
        section.set_header("CREATOR", self.authorship.creator.as_str());
        section.set_header("CONFIGUR", self.authorship.configuration.as_str());
        info!(class = %class, members = section.rows.len(), path = %path.display(), "index built");

        self.codec.write(&path, &index)?;
        Ok(path)
    }

    async fn attach_child_index_to_master(
        &self,
        master: &Path,
        child: &Path,
    ) -> Result<(), AttachFailure> {
        let mut master_container = self.codec.read(master)?;
        let mut child_container = self.codec.read(child)?;

        let group = master_container
            .sections
            .get_mut(MASTER_GROUP_SECTION)
            .ok_or_else(|| {
                AttachFailure::permanent(format!("{} has no group section", master.display()))
            })?;
        if group.columns.is_empty() {
            group.columns = vec![
                ColumnDef::new(MEMBER_LOCATION, "256A"),
                ColumnDef::new(MEMBER_NAME, "32A"),
            ];
        }

        let location = location_value(&self.layout, child);
        let already_attached = group
            .rows
            .iter()
            .any(|row| row.get(MEMBER_LOCATION) == Some(&location));
        if already_attached {
            debug!(child = %child.display(), "already attached to master");
        } else {
            let name = index_section(child, &mut child_container)?
                .extname()
                .unwrap_or_default()
                .to_string();
            group.rows.push(Row::from([
                (MEMBER_LOCATION.to_string(), location),
                (MEMBER_NAME.to_string(), HeaderValue::Text(name)),
            ]));
            self.codec.write(master, &master_container)?;
        }

        let master_name = location_value(&self.layout, master);
        index_section(child, &mut child_container)?
            .header
            .insert(PARENT.to_string(), master_name);
        self.codec.write(child, &child_container)?;
        Ok(())
    }

    async fn verify_index(&self, index: &Path, options: VerifyOptions) -> Result<(), AttachFailure> {
        let mut container = self.codec.read(index)?;
        let root = self.layout.root().to_path_buf();
        let section = index_section(index, &mut container)?;

        let mut detached = 0usize;
        let mut kept = Vec::with_capacity(section.rows.len());
        for row in section.rows.drain(..) {
            let location = row
                .get(MEMBER_LOCATION)
                .and_then(HeaderValue::as_str)
                .ok_or_else(|| AttachFailure::permanent("index row without member location"))?;
            let member = root.join(location);
            if !member.exists() {
                if options.detach_others {
                    warn!(member = %member.display(), "detaching missing member");
                    detached += 1;
                    continue;
                }
                return Err(AttachFailure::permanent(format!(
                    "missing member {}",
                    member.display()
                )));
            }
            if options.checksums {
                let recorded = row.get(CHECKSUM).and_then(HeaderValue::as_str);
                let actual = checksum(&member)?;
                if recorded != Some(actual.as_str()) {
                    return Err(AttachFailure::permanent(format!(
                        "checksum mismatch for {}",
                        member.display()
                    )));
                }
            }
            kept.push(row);
        }
        section.rows = kept;

        if options.backpointers {
            let parent = section
                .header_value(PARENT)
                .and_then(HeaderValue::as_str)
                .ok_or_else(|| {
                    AttachFailure::permanent(format!("{} is not attached", index.display()))
                })?;
            let master = self.codec.read(&root.join(parent))?;
            let location = location_value(&self.layout, index);
            let listed = master
                .sections
                .get(MASTER_GROUP_SECTION)
                .map(|group| {
                    group
                        .rows
                        .iter()
                        .any(|row| row.get(MEMBER_LOCATION) == Some(&location))
                })
                .unwrap_or(false);
            if !listed {
                return Err(AttachFailure::permanent(format!(
                    "{} points to {} which does not list it",
                    index.display(),
                    parent
                )));
            }
        }

        if detached > 0 {
            self.codec.write(index, &container)?;
        }
        debug!(index = %index.display(), detached, "index verified");
        Ok(())
    }
}

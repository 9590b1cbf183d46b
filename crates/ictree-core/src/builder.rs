//! IC tree build sessions.
//!
//! An [`IndexTreeBuilder`] accumulates classified calibration files for one
//! tree root and suffix, then materializes them in a single `build()`:
//! master first, then each dataset class in first-seen order (store files,
//! rebuild the per-dataset index, attach it, verify it), then the tree-wide
//! version stamps. The accumulation map belongs to the builder instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::attach::{AttachmentClient, CallPolicy, VerifyOptions};
use crate::classifier::DatasetClassifier;
use crate::container::{write_atomic, Container, ContainerCodec};
use crate::dataset::DatasetClass;
use crate::error::{AttachOp, IcError, IcResult};
use crate::layout::TreeLayout;
use crate::lock::TreeLock;
use crate::master::MasterIndexSynthesizer;
use crate::report::{BatchReport, BuildReport, ClassReport, ClassSummary, ItemOutcome, TreeSummary};
use crate::revision::{RevisionResolver, Serial, TimeConverter, Version, VSTOP};

/// Validity stop written to every stored file: valid until superseded.
pub const OPEN_ENDED_STOP: f64 = 99999.0;
/// Name of the fingerprint file looked up next to each input file.
pub const FINGERPRINT_SOURCE: &str = "hash.txt";
/// Format of the version stamps.
pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One calibration file accepted into a build session.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFile {
    /// File as given to `add`.
    pub origin: PathBuf,
    /// Dataset class.
    pub class: DatasetClass,
    /// Declared version.
    pub version: Version,
    /// Start of validity (IJD).
    pub validity_start: f64,
    /// End of validity (IJD) as declared by the input.
    pub validity_stop: f64,
    /// Revision of the validity start.
    pub revision: i64,
    /// Storage serial.
    pub serial: Serial,
    /// Content fingerprint, empty when the input carries none.
    pub fingerprint: String,
    /// Where the file was stored; set by `build`.
    pub storage_path: Option<PathBuf>,
    /// Stored size in bytes; set by `build`.
    pub size: Option<u64>,
}

/// Knobs of a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Timeout and retry of attachment calls.
    pub policy: CallPolicy,
    /// Validity stop forced on stored files.
    pub open_ended_stop: f64,
    /// Verification after attachment, if any.
    pub verify: Option<VerifyOptions>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            policy: CallPolicy::default(),
            open_ended_stop: OPEN_ENDED_STOP,
            verify: Some(VerifyOptions::default()),
        }
    }
}

/// Build session bound to one tree root and suffix.
pub struct IndexTreeBuilder {
    layout: TreeLayout,
    codec: Arc<dyn ContainerCodec>,
    resolver: RevisionResolver,
    synthesizer: MasterIndexSynthesizer,
    attachment: Arc<dyn AttachmentClient>,
    options: BuildOptions,
    structures: Vec<(DatasetClass, Vec<CalibrationFile>)>,
}

impl IndexTreeBuilder {
    /// Creates an empty session.
    pub fn new(
        layout: TreeLayout,
        codec: Arc<dyn ContainerCodec>,
        converter: Arc<dyn TimeConverter>,
        attachment: Arc<dyn AttachmentClient>,
        options: BuildOptions,
    ) -> Self {
        Self {
            layout,
            synthesizer: MasterIndexSynthesizer::new(codec.clone()),
            codec,
            resolver: RevisionResolver::new(converter),
            attachment,
            options,
            structures: Vec::new(),
        }
    }

    /// Layout of the tree being built.
    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Classifies and resolves `path`, then buffers it under its class.
    ///
    /// Only reads the input; errors are returned as-is and leave the session
    /// unchanged.
    pub fn add(&mut self, path: &Path) -> IcResult<&CalibrationFile> {
        info!(path = %path.display(), "requested to add");
        let container = self.codec.read(path)?;
        let class = DatasetClassifier::classify_container(path, &container)?;
        let resolution = self.resolver.resolve(path, &container)?;
        self.layout.storage_path(&class, resolution.serial)?;
        info!(path = %path.display(), class = %class, serial = %resolution.serial, "accepted");

        let file = CalibrationFile {
            origin: path.to_path_buf(),
            class: class.clone(),
            version: resolution.version,
            validity_start: resolution.validity_start,
            validity_stop: resolution.validity_stop,
            revision: resolution.revision,
            serial: resolution.serial,
            fingerprint: read_fingerprint(path)?,
            storage_path: None,
            size: None,
        };

        let slot = match self.structures.iter().position(|(c, _)| *c == class) {
            Some(slot) => slot,
            None => {
                self.structures.push((class, Vec::new()));
                self.structures.len() - 1
            }
        };
        let files = &mut self.structures[slot].1;
        files.push(file);
        Ok(&files[files.len() - 1])
    }

    /// Adds every path, collecting a per-item outcome instead of stopping.
    pub fn add_batch<I, P>(&mut self, paths: I) -> BatchReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = BatchReport::default();
        for path in paths {
            let path = path.as_ref();
            let result = self.add(path).map(|file| file.class.clone());
            report.outcomes.push(ItemOutcome {
                path: path.to_path_buf(),
                result,
            });
        }
        report
    }

    /// Buffered classes, in first-seen order.
    pub fn classes(&self) -> impl Iterator<Item = &DatasetClass> {
        self.structures.iter().map(|(class, _)| class)
    }

    /// Buffered files of `class`, in add order.
    pub fn files(&self, class: &DatasetClass) -> &[CalibrationFile] {
        self.structures
            .iter()
            .find(|(c, _)| c == class)
            .map(|(_, files)| files.as_slice())
            .unwrap_or(&[])
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Materializes the session into the tree.
    ///
    /// Holds the tree lock throughout. A version conflict aborts before the
    /// lock is taken or anything is written; an attachment failure stops at
    /// the failing class and leaves the classes before it on disk.
    pub async fn build(&mut self) -> IcResult<BuildReport> {
        let classes: Vec<(DatasetClass, Vec<Version>)> = self
            .structures
            .iter()
            .map(|(class, files)| (class.clone(), files.iter().map(|f| f.version).collect()))
            .collect();
        MasterIndexSynthesizer::resolve_versions(&classes)?;

        let _lock = TreeLock::acquire(&self.layout.lock_path())?;
        let master = self.synthesizer.init(&self.layout, &classes)?;
        let master_path = master.path.clone();

        let mut reports = Vec::with_capacity(self.structures.len());
        for slot in 0..self.structures.len() {
            let class = self.structures[slot].0.clone();
            info!(class = %class, files = self.structures[slot].1.len(), "processing dataset class");

            let mut stored: Vec<PathBuf> = Vec::new();
            for file in self.structures[slot].1.iter_mut() {
                let path = store_file(&self.layout, self.codec.as_ref(), self.options.open_ended_stop, file)?;
                if stored.contains(&path) {
                    warn!(path = %path.display(), origin = %file.origin.display(), "serial reused, stored file overwritten");
                } else {
                    stored.push(path);
                }
            }
            info!(class = %class, files = ?stored, "file list");

            let index = self.rebuild_index(&class, &stored, &master_path).await?;
            reports.push(ClassReport {
                version: self.structures[slot].1[0].version,
                class,
                stored,
                index,
            });
        }

        let stamp = self.write_version_stamps()?;
        info!(root = %self.layout.root().display(), %stamp, "tree build complete");

        Ok(BuildReport {
            master,
            classes: reports,
            stamp,
        })
    }

    async fn rebuild_index(
        &self,
        class: &DatasetClass,
        stored: &[PathBuf],
        master: &Path,
    ) -> IcResult<PathBuf> {
        let policy = self.options.policy;
        let client = &self.attachment;

        let existing = self.layout.index_path(class);
        if existing.exists() {
            info!(path = %existing.display(), "index exists, overwriting");
        }

        policy
            .run(class, AttachOp::CreateEmpty, || client.create_empty_index(class))
            .await?;
        let index = policy
            .run(class, AttachOp::BuildFromList, || {
                client.build_index_from_file_list(class, stored)
            })
            .await?;
        policy
            .run(class, AttachOp::AttachToMaster, || {
                client.attach_child_index_to_master(master, &index)
            })
            .await?;
        if let Some(options) = self.options.verify {
            policy
                .run(class, AttachOp::Verify, || client.verify_index(&index, options))
                .await?;
        }
        Ok(index)
    }

    fn write_version_stamps(&self) -> IcResult<String> {
        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        for path in [self.layout.index_stamp_path(), self.layout.bucket_stamp_path()] {
            write_atomic(&path, stamp.as_bytes())?;
        }
        Ok(stamp)
    }

    /// Per-class file count and stored size.
    pub fn summarize(&self) -> TreeSummary {
        let classes = self
            .structures
            .iter()
            .map(|(class, files)| ClassSummary {
                class: class.clone(),
                files: files.len(),
                stored_bytes: files.iter().filter_map(|f| f.size).sum(),
            })
            .collect::<Vec<_>>();
        for line in &classes {
            info!(
                class = %line.class,
                files = line.files,
                mib = line.stored_bytes as f64 / 1024.0 / 1024.0,
                "summary"
            );
        }
        TreeSummary { classes }
    }
}

/// Copies `file` into the tree with its validity stop forced open-ended.
fn store_file(
    layout: &TreeLayout,
    codec: &dyn ContainerCodec,
    open_ended_stop: f64,
    file: &mut CalibrationFile,
) -> IcResult<PathBuf> {
    let target = layout.storage_path(&file.class, file.serial)?;
    info!(origin = %file.origin.display(), target = %target.display(), "store in IC");

    let mut container = codec.read(&file.origin)?;
    force_validity_stop(&file.origin, &mut container, open_ended_stop)?;
    codec.write(&target, &container)?;

    let sidecar = TreeLayout::fingerprint_path(&target);
    write_atomic(&sidecar, file.fingerprint.as_bytes())?;

    file.size = Some(std::fs::metadata(&target)?.len());
    file.storage_path = Some(target.clone());
    Ok(target)
}

/// Sets `VSTOP` on the data section and on every other section declaring one,
/// so the stored file carries a single stop value.
fn force_validity_stop(origin: &Path, container: &mut Container, stop: f64) -> IcResult<()> {
    if container.sections.len() < 2 {
        return Err(IcError::Format {
            path: origin.to_path_buf(),
            reason: format!("too few sections ({})", container.sections.len()),
        });
    }
    for (number, section) in container.sections.iter_mut().enumerate() {
        if number == 1 || section.header.contains_key(VSTOP) {
            section.set_header(VSTOP, stop);
        }
    }
    Ok(())
}

/// Reads the fingerprint file next to `path`, or an empty fingerprint.
fn read_fingerprint(path: &Path) -> IcResult<String> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match std::fs::read_to_string(dir.join(FINGERPRINT_SOURCE)) {
        Ok(hash) => Ok(hash),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

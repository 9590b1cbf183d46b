//! Tree versions living side by side under one collection root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::{IcError, IcResult};
use crate::layout::{INDEX_DIR, MASTER_STEM};

/// Name of the tree new versions are cloned from by default.
pub const DEFAULT_BASE: &str = "bare";

/// One tree version found in the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeVersion {
    /// Directory name under the collection root.
    pub name: String,
    /// Full path of the tree root.
    pub path: PathBuf,
    /// Last modification time of the tree root.
    pub modified: SystemTime,
}

/// Where a `create` run writes and what it starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Root the build writes into.
    pub root: PathBuf,
    /// Tree the root is seeded from.
    pub base: PathBuf,
    /// True when `root` is `base` itself.
    pub in_place: bool,
}

impl BuildTarget {
    /// True when the base must be copied into the root first.
    pub fn needs_clone(&self) -> bool {
        !self.in_place
    }
}

/// Counters returned by [`TreeCollection::clone_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    /// Files copied.
    pub copied: usize,
    /// Files left alone because the destination was newer.
    pub skipped: usize,
    /// Bytes copied.
    pub bytes: u64,
}

/// The parent directory of all tree versions.
#[derive(Debug, Clone)]
pub struct TreeCollection {
    root: PathBuf,
}

impl TreeCollection {
    /// Collection rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the tree versions.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tree versions ordered by modification time, oldest first.
    pub fn list_versions(&self) -> IcResult<Vec<TreeVersion>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            versions.push(TreeVersion {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                modified: metadata.modified()?,
            });
        }
        versions.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(versions)
    }

    /// Version name generated when none is given.
    pub fn dev_tag(now: DateTime<Local>, pid: u32) -> String {
        format!("dev{}-{}", now.format("%y%m%d.%H%M"), pid)
    }

    /// Resolves the output root of a build.
    ///
    /// In place, the base itself is rebuilt and any explicit version is
    /// ignored. Otherwise the root is `<collection>/<version>`, or a fresh dev
    /// tag when no version is given.
    pub fn resolve_target(
        &self,
        version: Option<&str>,
        base: Option<&Path>,
        in_place: bool,
    ) -> BuildTarget {
        let base = base
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.join(DEFAULT_BASE));

        let root = if in_place {
            if let Some(version) = version {
                warn!(version, "in-place update: version ignored");
            }
            base.clone()
        } else {
            match version {
                Some(version) => self.root.join(version),
                None => {
                    let tag = Self::dev_tag(Local::now(), std::process::id());
                    warn!(version = %tag, "constructing current version name");
                    self.root.join(tag)
                }
            }
        };

        info!(base = %base.display(), root = %root.display(), in_place, "resolved build target");
        BuildTarget {
            root,
            base,
            in_place,
        }
    }

    /// Path of a named tree version.
    pub fn tree_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Unsuffixed master of a named tree version.
    pub fn master_path(&self, name: &str, extension: &str) -> PathBuf {
        self.tree_path(name)
            .join(INDEX_DIR)
            .join(format!("{}.{}", MASTER_STEM, extension))
    }

    /// Copies `base` into `dest`, leaving destination files that are newer.
    pub fn clone_tree(base: &Path, dest: &Path) -> IcResult<CloneStats> {
        if !base.is_dir() {
            return Err(IcError::Config(format!(
                "base tree {} is not a directory",
                base.display()
            )));
        }

        let mut stats = CloneStats::default();
        let mut stack = vec![(base.to_path_buf(), dest.to_path_buf())];

        while let Some((src, dst)) = stack.pop() {
            let metadata = fs::metadata(&src)?;
            if metadata.is_dir() {
                fs::create_dir_all(&dst)?;
                for entry in fs::read_dir(&src)? {
                    let entry = entry?;
                    stack.push((entry.path(), dst.join(entry.file_name())));
                }
                continue;
            }

            let src_modified = metadata.modified()?;
            if let Ok(existing) = fs::metadata(&dst) {
                if existing.modified()? > src_modified {
                    debug!(path = %dst.display(), "destination newer, skipped");
                    stats.skipped += 1;
                    continue;
                }
            }

            stats.bytes += fs::copy(&src, &dst)?;
            fs::File::options()
                .write(true)
                .open(&dst)?
                .set_modified(src_modified)?;
            stats.copied += 1;
        }

        info!(
            base = %base.display(),
            dest = %dest.display(),
            copied = stats.copied,
            skipped = stats.skipped,
            "tree cloned"
        );
        Ok(stats)
    }
}

/// Reads a list file: one path per line, blank lines skipped.
pub fn read_list_file(path: &Path) -> IcResult<Vec<PathBuf>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

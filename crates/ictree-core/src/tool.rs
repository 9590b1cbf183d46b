//! External index tools: runner, attachment client and dataset finder.
//!
//! Tools take `name=value` parameters on the command line, the way the
//! instrument's parameter-file driven executables expect them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::attach::{AttachFailure, AttachmentClient, Authorship, VerifyOptions};
use crate::dataset::DatasetClass;
use crate::layout::TreeLayout;
use crate::master::MASTER_GROUP_SECTION;

/// Executable names of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolNames {
    /// Creates an empty index from a template.
    pub dal_create: String,
    /// Builds an index from a text list of members.
    pub txt2idx: String,
    /// Sets a header card.
    pub fparkey: String,
    /// Attaches a child to a parent group.
    pub dal_attach: String,
    /// Verifies an index.
    pub dal_verify: String,
    /// Resolves a dataset from a master file.
    pub ic_find: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            dal_create: "dal_create".to_string(),
            txt2idx: "txt2idx".to_string(),
            fparkey: "fparkey".to_string(),
            dal_attach: "dal_attach".to_string(),
            dal_verify: "dal_verify".to_string(),
            ic_find: "ic_find".to_string(),
        }
    }
}

/// Captured result of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Runs external tools with a deadline.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    /// Creates a runner killing tools that exceed `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs `tool` with `name=value` parameters.
    pub async fn run(&self, tool: &str, params: &[(&str, String)]) -> Result<ToolOutput, AttachFailure> {
        let args: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        self.run_args(tool, &args).await
    }

    /// Runs `tool` with raw arguments.
    pub async fn run_args(&self, tool: &str, args: &[String]) -> Result<ToolOutput, AttachFailure> {
        debug!(tool, ?args, "running tool");
        let child = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AttachFailure::transient(format!("cannot start {}: {}", tool, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AttachFailure::transient(format!(
                    "{} timed out after {:?}",
                    tool, self.timeout
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(AttachFailure::permanent(format!(
                "{} exited with {}: {}",
                tool,
                output.status,
                last_lines(&stderr, 5)
            )));
        }
        Ok(ToolOutput { stdout, stderr })
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

/// Removes `path`, its gzip sibling, and ignores absence.
fn remove_previous(path: &Path) -> Result<(), AttachFailure> {
    let gz = PathBuf::from(format!("{}.gz", path.display()));
    for candidate in [path.to_path_buf(), gz] {
        match std::fs::remove_file(&candidate) {
            Ok(()) => debug!(path = %candidate.display(), "removed previous index"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Attachment client driving the external index tools.
#[derive(Debug, Clone)]
pub struct ToolAttachmentClient {
    runner: ToolRunner,
    tools: ToolNames,
    layout: TreeLayout,
    authorship: Authorship,
}

impl ToolAttachmentClient {
    /// Creates a client for the tree described by `layout`.
    pub fn new(runner: ToolRunner, tools: ToolNames, layout: TreeLayout, authorship: Authorship) -> Self {
        Self {
            runner,
            tools,
            layout,
            authorship,
        }
    }

    async fn set_card(&self, index: &Path, keyword: &str, value: &str) -> Result<(), AttachFailure> {
        self.runner
            .run(
                &self.tools.fparkey,
                &[
                    ("value", value.to_string()),
                    ("fitsfile", format!("{}[1]", index.display())),
                    ("keyword", keyword.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

fn yes_no(flag: bool) -> String {
    let answer = if flag { "yes" } else { "no" };
    answer.to_string()
}

#[async_trait]
impl AttachmentClient for ToolAttachmentClient {
    async fn create_empty_index(&self, class: &DatasetClass) -> Result<(), AttachFailure> {
        let index = self.layout.index_path(class);
        remove_previous(&index)?;
        self.runner
            .run(
                &self.tools.dal_create,
                &[
                    ("obj_name", index.display().to_string()),
                    ("template", TreeLayout::index_template(class)),
                ],
            )
            .await?;
        Ok(())
    }

    async fn build_index_from_file_list(
        &self,
        class: &DatasetClass,
        files: &[PathBuf],
    ) -> Result<PathBuf, AttachFailure> {
        // txt2idx appends with update=1, so a retried call starts from a fresh index.
        self.create_empty_index(class).await?;
        let index = self.layout.index_path(class);

        let mut element_list = tempfile::NamedTempFile::new()?;
        for file in files {
            writeln!(element_list, "{}", file.display())?;
        }
        element_list.flush()?;

        self.runner
            .run(
                &self.tools.txt2idx,
                &[
                    ("index", index.display().to_string()),
                    ("template", TreeLayout::index_template(class)),
                    ("update", "1".to_string()),
                    ("element", element_list.path().display().to_string()),
                ],
            )
            .await?;

        self.set_card(&index, "CREATOR", &self.authorship.creator).await?;
        self.set_card(&index, "CONFIGUR", &self.authorship.configuration)
            .await?;
        info!(class = %class, members = files.len(), path = %index.display(), "index built");
        Ok(index)
    }

    async fn attach_child_index_to_master(
        &self,
        master: &Path,
        child: &Path,
    ) -> Result<(), AttachFailure> {
        self.runner
            .run(
                &self.tools.dal_attach,
                &[
                    ("Parent", format!("{}[{}]", master.display(), MASTER_GROUP_SECTION)),
                    ("Child1", child.display().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn verify_index(&self, index: &Path, options: VerifyOptions) -> Result<(), AttachFailure> {
        self.runner
            .run(
                &self.tools.dal_verify,
                &[
                    ("indol", index.display().to_string()),
                    ("checksums", yes_no(options.checksums)),
                    ("backpointers", yes_no(options.backpointers)),
                    ("detachother", yes_no(options.detach_others)),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Looks up the dataset selected by a tree's master through the finder tool.
#[derive(Debug, Clone)]
pub struct DatasetFinder {
    runner: ToolRunner,
    tool: String,
}

impl DatasetFinder {
    /// Creates a finder running `tool`.
    pub fn new(runner: ToolRunner, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
        }
    }

    /// Resolves `extname` in `master`, writing the selection to `sub_index`.
    pub async fn find(
        &self,
        master: &Path,
        extname: &str,
        sub_index: &Path,
    ) -> Result<ToolOutput, AttachFailure> {
        self.runner
            .run(
                &self.tool,
                &[
                    ("icConfig", master.display().to_string()),
                    ("extname", extname.to_string()),
                    ("aliasRef", "OSA".to_string()),
                    ("subIndex", sub_index.display().to_string()),
                ],
            )
            .await
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use ictree_core::builder::STAMP_FORMAT;
use ictree_core::{
    read_list_file, AttachmentClient, BatchReport, BuildReport, ContainerCodec, DatasetFinder,
    IcConfig, IndexBackend, IndexTreeBuilder, JsonContainerCodec, NativeIndexClient,
    ToolAttachmentClient, ToolRunner, TreeCollection, TreeLayout, TreeSummary,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ictree")]
#[command(about = "Build and inspect IC index trees", long_about = None)]
pub struct Cli {
    #[arg(short, long)]
    pub debug: bool,

    #[arg(short, long, env = "ICTREE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a tree version from calibration files.
    Create(CreateArgs),
    /// List tree versions, oldest first.
    List,
    /// Dump the master tables of a tree version.
    Inspect { ic: String },
    /// Resolve a dataset through a tree's master with the finder tool.
    Find {
        ic_path: String,
        ext_name: String,
        #[arg(long)]
        sub_index: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    pub icfiles: Vec<PathBuf>,

    /// List files, one calibration file per line.
    #[arg(short, long)]
    pub from_file: Vec<PathBuf>,

    #[arg(short, long)]
    pub suffix: Option<String>,

    /// Tree version name; a dev tag is generated when absent.
    #[arg(short = 'v', long = "version")]
    pub ic_version: Option<String>,

    /// Rebuild the base tree itself instead of a new version.
    #[arg(short, long)]
    pub in_place: bool,

    #[arg(short, long)]
    pub base_location: Option<PathBuf>,

    /// Refuse to build when any input is rejected.
    #[arg(long)]
    pub strict: bool,
}

/// What a `create` run produced.
#[derive(Debug)]
pub struct CreateOutcome {
    pub root: PathBuf,
    pub inputs: BatchReport,
    pub build: BuildReport,
    pub summary: TreeSummary,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = IcConfig::load(self.config.as_deref())?;
        self.execute(&config).await
    }

    pub async fn execute(self, config: &IcConfig) -> Result<()> {
        match self.command {
            Command::Create(ref args) => {
                let outcome = create(config, args).await?;
                print!("{}", outcome.summary);
                info!(root = %outcome.root.display(), "IC tree ready in");
                Ok(())
            }
            Command::List => list(config),
            Command::Inspect { ref ic } => inspect(config, ic),
            Command::Find {
                ref ic_path,
                ref ext_name,
                ref sub_index,
            } => find(config, ic_path, ext_name, sub_index.as_deref()).await,
        }
    }
}

fn codec() -> Arc<dyn ContainerCodec> {
    Arc::new(JsonContainerCodec::new())
}

fn attachment_client(
    config: &IcConfig,
    codec: Arc<dyn ContainerCodec>,
    layout: &TreeLayout,
) -> Arc<dyn AttachmentClient> {
    match config.index_backend {
        IndexBackend::Native => Arc::new(NativeIndexClient::new(
            codec,
            layout.clone(),
            config.authorship.clone(),
        )),
        IndexBackend::Tools => Arc::new(ToolAttachmentClient::new(
            ToolRunner::new(config.tool_timeout()),
            config.tools.clone(),
            layout.clone(),
            config.authorship.clone(),
        )),
    }
}

pub async fn create(config: &IcConfig, args: &CreateArgs) -> Result<CreateOutcome> {
    let collection = TreeCollection::new(config.collection_root()?);
    let target = collection.resolve_target(
        args.ic_version.as_deref(),
        args.base_location.as_deref(),
        args.in_place,
    );
    info!(base = %target.base.display(), "will use base location");
    warn!(root = %target.root.display(), "output IC root");

    if target.needs_clone() {
        TreeCollection::clone_tree(&target.base, &target.root)
            .with_context(|| format!("cloning {}", target.base.display()))?;
    }

    let codec = codec();
    let layout = TreeLayout::new(
        &target.root,
        args.suffix.as_deref(),
        codec.extension(),
        Arc::new(config.catalog()?),
    );
    let client = attachment_client(config, codec.clone(), &layout);
    let mut builder = IndexTreeBuilder::new(
        layout,
        codec,
        Arc::new(config.revision_clock),
        client,
        config.build_options(),
    );

    let mut inputs = BatchReport::default();
    for list in &args.from_file {
        info!(list = %list.display(), "from");
        let paths = read_list_file(list)?;
        inputs.extend(builder.add_batch(paths));
    }
    inputs.extend(builder.add_batch(&args.icfiles));

    for (path, err) in inputs.failures() {
        error!(path = %path.display(), kind = err.kind(), error = %err, "failed to add");
    }
    if args.strict && !inputs.is_clean() {
        bail!(
            "{} of {} input files rejected",
            inputs.outcomes.len() - inputs.accepted(),
            inputs.outcomes.len()
        );
    }
    if builder.is_empty() {
        warn!("no calibration files accepted; refreshing master and stamps only");
    }

    let build = builder.build().await?;
    let summary = builder.summarize();
    Ok(CreateOutcome {
        root: target.root,
        inputs,
        build,
        summary,
    })
}

fn list(config: &IcConfig) -> Result<()> {
    let collection = TreeCollection::new(config.collection_root()?);
    for version in collection.list_versions()? {
        let modified: DateTime<Local> = version.modified.into();
        info!(name = %version.name, path = %version.path.display(), "ic_version");
        println!("{}\t{}", modified.format(STAMP_FORMAT), version.name);
    }
    Ok(())
}

fn inspect(config: &IcConfig, ic: &str) -> Result<()> {
    let collection = TreeCollection::new(config.collection_root()?);
    let codec = codec();
    let master = collection.master_path(ic, codec.extension());
    let container = codec
        .read(&master)
        .with_context(|| format!("reading master of {}", ic))?;

    for (number, section) in container.sections.iter().enumerate().skip(1) {
        println!("[{}] {}", number, section.extname().unwrap_or("-"));
        let columns: Vec<&str> = section.columns.iter().map(|c| c.name.as_str()).collect();
        println!("    columns: {}", columns.join(" "));
        for row in &section.rows {
            println!("    {}", serde_json::to_string(row)?);
        }
    }
    Ok(())
}

async fn find(config: &IcConfig, ic_path: &str, ext_name: &str, sub_index: Option<&Path>) -> Result<()> {
    let collection = TreeCollection::new(config.collection_root()?);
    let codec = codec();
    let master = collection.master_path(ic_path, codec.extension());
    let sub_index = sub_index
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("sub_index.{}", codec.extension())));

    let finder = DatasetFinder::new(ToolRunner::new(config.tool_timeout()), config.tools.ic_find.clone());
    let output = finder.find(&master, ext_name, &sub_index).await?;
    print!("{}", output.stdout);
    info!(sub_index = %sub_index.display(), "dataset selection written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "ictree", "-d", "create", "-s", "nrt", "-v", "osa11.2", "-f", "list.txt", "a.fits",
            "b.fits",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::Create(args) => {
                assert_eq!(args.icfiles, vec![PathBuf::from("a.fits"), PathBuf::from("b.fits")]);
                assert_eq!(args.from_file, vec![PathBuf::from("list.txt")]);
                assert_eq!(args.suffix.as_deref(), Some("nrt"));
                assert_eq!(args.ic_version.as_deref(), Some("osa11.2"));
                assert!(!args.in_place);
                assert!(!args.strict);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_parse_in_place_with_base() {
        let cli = Cli::try_parse_from(["ictree", "create", "-i", "-b", "/ic/osa11", "x.fits"]).unwrap();
        match cli.command {
            Command::Create(args) => {
                assert!(args.in_place);
                assert_eq!(args.base_location, Some(PathBuf::from("/ic/osa11")));
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_parse_find() {
        let cli = Cli::try_parse_from(["ictree", "find", "osa11", "ISGR-RISE-MOD"]).unwrap();
        match cli.command {
            Command::Find {
                ic_path,
                ext_name,
                sub_index,
            } => {
                assert_eq!(ic_path, "osa11");
                assert_eq!(ext_name, "ISGR-RISE-MOD");
                assert!(sub_index.is_none());
            }
            _ => panic!("expected find"),
        }
    }

    #[test]
    fn test_inspect_requires_tree() {
        assert!(Cli::try_parse_from(["ictree", "inspect"]).is_err());
    }

    #[tokio::test]
    async fn test_create_without_collection_fails() {
        let err = create(&IcConfig::default(), &CreateArgs::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("IC_COLLECTION"));
    }
}

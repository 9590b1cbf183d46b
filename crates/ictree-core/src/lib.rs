#![warn(missing_docs)]

//! Calibration index tree engine: classify, store and index IC files
//!
//! Calibration files are classified by dataset, stored under a serial derived
//! from their validity revision, and indexed per dataset. Each per-dataset
//! index is attached to a master index whose version table records which
//! version of every dataset the tree carries.

pub mod attach;
pub mod builder;
pub mod classifier;
pub mod collection;
pub mod config;
pub mod container;
pub mod dataset;
pub mod error;
pub mod layout;
pub mod lock;
pub mod master;
pub mod native_index;
pub mod report;
pub mod revision;
pub mod tool;

pub use attach::{AttachFailure, AttachmentClient, Authorship, CallPolicy, FailureKind, VerifyOptions};
pub use builder::{BuildOptions, CalibrationFile, IndexTreeBuilder, OPEN_ENDED_STOP};
pub use classifier::DatasetClassifier;
pub use collection::{read_list_file, BuildTarget, CloneStats, TreeCollection, TreeVersion};
pub use config::{IcConfig, IndexBackend, COLLECTION_ENV};
pub use container::{Container, ContainerCodec, HeaderValue, JsonContainerCodec, Section};
pub use dataset::{DatasetCatalog, DatasetClass, DatasetKind, DatasetSpec, StorageBucket};
pub use error::{AttachOp, IcError, IcResult};
pub use layout::TreeLayout;
pub use lock::TreeLock;
pub use master::{MasterIndexSynthesizer, MasterUpdate};
pub use native_index::NativeIndexClient;
pub use report::{BatchReport, BuildReport, ClassReport, ClassSummary, ItemOutcome, TreeSummary};
pub use revision::{LinearRevisionClock, Resolution, RevisionResolver, Serial, TimeConverter, Version};
pub use tool::{DatasetFinder, ToolAttachmentClient, ToolNames, ToolRunner};

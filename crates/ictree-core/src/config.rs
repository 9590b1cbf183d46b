//! Configuration of IC tree builds.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attach::{Authorship, CallPolicy, VerifyOptions};
use crate::builder::{BuildOptions, OPEN_ENDED_STOP};
use crate::dataset::{DatasetCatalog, DatasetSpec};
use crate::error::{IcError, IcResult};
use crate::revision::LinearRevisionClock;
use crate::tool::ToolNames;

/// Environment variable naming the parent directory of all tree versions.
pub const COLLECTION_ENV: &str = "IC_COLLECTION";

/// Which collaborator maintains per-dataset indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process container edits.
    Native,
    /// External index tools.
    Tools,
}

/// Settings of a build, read from TOML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcConfig {
    /// Parent directory of all tree versions.
    pub collection: Option<PathBuf>,
    /// Deadline for a single attachment or tool call.
    pub tool_timeout_secs: u64,
    /// Retry a transiently failed call once.
    pub retry_transient: bool,
    /// Verify each index after attaching it.
    pub verify_after_attach: bool,
    /// `VSTOP` written on every stored file.
    pub open_ended_stop: f64,
    /// Index maintenance backend.
    pub index_backend: IndexBackend,
    /// Cards stamped on rebuilt indices.
    pub authorship: Authorship,
    /// IJD to revision conversion.
    pub revision_clock: LinearRevisionClock,
    /// External tool executables.
    pub tools: ToolNames,
    /// Extra dataset classes on top of the built-in catalog.
    pub datasets: Vec<DatasetSpec>,
}

impl Default for IcConfig {
    fn default() -> Self {
        Self {
            collection: None,
            tool_timeout_secs: 300,
            retry_transient: true,
            verify_after_attach: true,
            open_ended_stop: OPEN_ENDED_STOP,
            index_backend: IndexBackend::Native,
            authorship: Authorship::default(),
            revision_clock: LinearRevisionClock::default(),
            tools: ToolNames::default(),
            datasets: Vec::new(),
        }
    }
}

impl IcConfig {
    /// Loads a config file, TOML or JSON by extension.
    pub fn from_file(path: &Path) -> IcResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .map_err(|e| IcError::Config(format!("{}: {}", path.display(), e))),
            "json" => serde_json::from_str(&contents)
                .map_err(|e| IcError::Config(format!("{}: {}", path.display(), e))),
            _ => Err(IcError::Config(format!(
                "Unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Loads the optional config file, then applies the environment.
    pub fn load(path: Option<&Path>) -> IcResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_collection_env(std::env::var_os(COLLECTION_ENV)))
    }

    /// Overrides the collection root with a non-empty environment value.
    pub fn with_collection_env(mut self, value: Option<OsString>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.collection = Some(PathBuf::from(value));
        }
        self
    }

    /// The collection root; required before any build starts.
    pub fn collection_root(&self) -> IcResult<PathBuf> {
        self.collection
            .clone()
            .ok_or_else(|| IcError::Config(format!("{} is needed", COLLECTION_ENV)))
    }

    /// Timeout and retry applied to each attachment call.
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.tool_timeout(),
            retry_transient: self.retry_transient,
        }
    }

    /// Deadline for a single external tool run.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Build knobs derived from this config.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            policy: self.call_policy(),
            open_ended_stop: self.open_ended_stop,
            verify: self.verify_after_attach.then(VerifyOptions::default),
        }
    }

    /// Built-in catalog extended with the configured datasets.
    pub fn catalog(&self) -> IcResult<DatasetCatalog> {
        DatasetCatalog::builtin_with(self.datasets.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetClass, DatasetKind, StorageBucket};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = IcConfig::default();
        assert!(config.collection.is_none());
        assert_eq!(config.tool_timeout_secs, 300);
        assert!(config.retry_transient);
        assert_eq!(config.open_ended_stop, 99999.0);
        assert_eq!(config.index_backend, IndexBackend::Native);
        assert_eq!(config.authorship.configuration, "dev");
    }

    #[test]
    fn test_missing_collection_is_config_error() {
        let config = IcConfig::default().with_collection_env(None);
        assert!(matches!(
            config.collection_root().unwrap_err(),
            IcError::Config(_)
        ));
    }

    #[test]
    fn test_env_overrides_file_collection() {
        let config = IcConfig {
            collection: Some(PathBuf::from("/from/file")),
            ..IcConfig::default()
        }
        .with_collection_env(Some(OsString::from("/from/env")));
        assert_eq!(config.collection_root().unwrap(), PathBuf::from("/from/env"));

        let kept = IcConfig {
            collection: Some(PathBuf::from("/from/file")),
            ..IcConfig::default()
        }
        .with_collection_env(Some(OsString::new()));
        assert_eq!(kept.collection_root().unwrap(), PathBuf::from("/from/file"));
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
collection = "/sps/integral/data/ic"
tool_timeout_secs = 60
index_backend = "tools"

[authorship]
creator = "IC team"
configuration = "osa11"

[[datasets]]
name = "ISGR-XTRA-MOD"
kind = "model"
bucket = "ibis-response"
            "#
        )
        .unwrap();

        let config = IcConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collection, Some(PathBuf::from("/sps/integral/data/ic")));
        assert_eq!(config.call_policy().timeout, Duration::from_secs(60));
        assert_eq!(config.index_backend, IndexBackend::Tools);
        assert_eq!(config.authorship.creator, "IC team");
        assert!(config.retry_transient);

        let catalog = config.catalog().unwrap();
        let extra = DatasetClass::new("ISGR-XTRA-MOD");
        assert_eq!(catalog.kind(&extra).unwrap(), DatasetKind::Model);
        assert_eq!(catalog.bucket(&extra).unwrap(), StorageBucket::IbisResponse);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"verify_after_attach": false, "open_ended_stop": 88888.0}}"#).unwrap();

        let config = IcConfig::from_file(file.path()).unwrap();
        let options = config.build_options();
        assert!(options.verify.is_none());
        assert_eq!(options.open_ended_stop, 88888.0);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(matches!(
            IcConfig::from_file(file.path()).unwrap_err(),
            IcError::Config(_)
        ));
    }
}

//! Dataset classification of incoming calibration files.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::container::{Container, ContainerCodec};
use crate::dataset::DatasetClass;
use crate::error::{IcError, IcResult};

/// Identifies a file's dataset class and checks its structural shape.
///
/// A raw calibration file holds exactly one data section after the primary
/// container. Anything with more sections is an already-built index and is
/// refused so it never gets ingested twice.
#[derive(Clone)]
pub struct DatasetClassifier {
    codec: Arc<dyn ContainerCodec>,
}

impl DatasetClassifier {
    /// Creates a classifier reading files through `codec`.
    pub fn new(codec: Arc<dyn ContainerCodec>) -> Self {
        Self { codec }
    }

    /// Opens `path` and returns its dataset class.
    pub fn classify(&self, path: &Path) -> IcResult<DatasetClass> {
        let container = self.codec.read(path)?;
        Self::classify_container(path, &container)
    }

    /// Classifies an already decoded container read from `path`.
    pub fn classify_container(path: &Path, container: &Container) -> IcResult<DatasetClass> {
        let data_sections = container.data_section_count();
        if data_sections > 1 {
            warn!(
                path = %path.display(),
                sections = container.sections.len(),
                "refusing multi-section file, probably an index"
            );
            return Err(IcError::Format {
                path: path.to_path_buf(),
                reason: format!("too many sections ({})", container.sections.len()),
            });
        }
        if data_sections == 0 {
            return Err(IcError::Format {
                path: path.to_path_buf(),
                reason: format!("too few sections ({})", container.sections.len()),
            });
        }

        let extname = container.sections[1].extname().ok_or_else(|| IcError::Format {
            path: path.to_path_buf(),
            reason: "data section has no EXTNAME".to_string(),
        })?;
        let class = DatasetClass::new(extname);
        debug!(path = %path.display(), class = %class, "classified");
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{JsonContainerCodec, Section};

    fn write(dir: &Path, name: &str, container: &Container) -> std::path::PathBuf {
        let path = dir.join(name);
        JsonContainerCodec::new().write(&path, container).unwrap();
        path
    }

    #[test]
    fn test_single_data_section_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "rise.json",
            &Container::with_data_section(Section::named("ISGR-RISE-MOD")),
        );
        let classifier = DatasetClassifier::new(Arc::new(JsonContainerCodec::new()));
        assert_eq!(
            classifier.classify(&path).unwrap(),
            DatasetClass::new("ISGR-RISE-MOD")
        );
    }

    #[test]
    fn test_too_many_sections() {
        let container = Container {
            sections: vec![
                Section::default(),
                Section::named("GROUPING"),
                Section::named("ISGR-RISE-MOD-IDX"),
            ],
        };
        let err = DatasetClassifier::classify_container(Path::new("idx.json"), &container)
            .unwrap_err();
        match err {
            IcError::Format { reason, .. } => assert!(reason.starts_with("too many sections")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_too_few_sections() {
        let err = DatasetClassifier::classify_container(Path::new("empty.json"), &Container::new())
            .unwrap_err();
        match err {
            IcError::Format { reason, .. } => assert!(reason.starts_with("too few sections")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_extname() {
        let container = Container::with_data_section(Section::default());
        let err = DatasetClassifier::classify_container(Path::new("anon.json"), &container)
            .unwrap_err();
        assert!(matches!(err, IcError::Format { .. }));
    }
}

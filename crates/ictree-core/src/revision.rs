//! Validity metadata, revision numbers and storage serials.
//!
//! A calibration file declares its validity window (`VSTART`, `VSTOP`, in IJD)
//! and a `VERSION`. The start time is converted into a revision number through
//! a [`TimeConverter`]; the revision becomes the file's storage serial when it
//! is plausible, otherwise the file lands in the static serial bucket.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::container::{Container, HeaderValue};
use crate::error::{IcError, IcResult};

/// Header keyword for the start of validity.
pub const VSTART: &str = "VSTART";
/// Header keyword for the end of validity.
pub const VSTOP: &str = "VSTOP";
/// Header keyword for the dataset version.
pub const VERSION: &str = "VERSION";

/// Revisions at or beyond this are not plausible orbit numbers.
pub const MAX_PLAUSIBLE_REVISION: i64 = 9000;
/// Serial shared by every file that is not keyed by revision.
pub const STATIC_SERIAL: u32 = 1;

/// Version of a dataset class; one per class per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub i64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-class sequence number naming a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(pub u32);

impl Serial {
    /// Maps a revision to its serial: the revision itself inside
    /// `[0, MAX_PLAUSIBLE_REVISION)`, otherwise [`STATIC_SERIAL`].
    pub fn from_revision(revision: i64) -> Self {
        if (0..MAX_PLAUSIBLE_REVISION).contains(&revision) {
            Serial(revision as u32)
        } else {
            Serial(STATIC_SERIAL)
        }
    }

    /// True when this serial is the static bucket.
    pub fn is_static(self) -> bool {
        self.0 == STATIC_SERIAL
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Converts IJD times into revision numbers.
pub trait TimeConverter: Send + Sync {
    /// Revision number containing `ijd`.
    fn ijd_to_revision(&self, ijd: f64) -> IcResult<i64>;
}

/// Revision clock assuming revisions of constant length from a fixed epoch.
///
/// This approximates the mission time system well enough to bucket files by
/// orbit; configure `epoch_ijd` and `period_days` for the mission phase at hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearRevisionClock {
    /// IJD at which revision 0 starts.
    pub epoch_ijd: f64,
    /// Length of one revision in days.
    pub period_days: f64,
}

impl Default for LinearRevisionClock {
    fn default() -> Self {
        Self {
            epoch_ijd: 1020.0,
            period_days: 2.9994,
        }
    }
}

impl TimeConverter for LinearRevisionClock {
    fn ijd_to_revision(&self, ijd: f64) -> IcResult<i64> {
        if !ijd.is_finite() {
            return Err(IcError::TimeConversion {
                value: ijd,
                reason: "not a finite time".to_string(),
            });
        }
        if self.period_days <= 0.0 {
            return Err(IcError::TimeConversion {
                value: ijd,
                reason: format!("non-positive revision period {}", self.period_days),
            });
        }
        Ok(((ijd - self.epoch_ijd) / self.period_days).floor() as i64)
    }
}

/// Validity and identity of one calibration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    /// Declared dataset version.
    pub version: Version,
    /// Start of validity (IJD).
    pub validity_start: f64,
    /// End of validity (IJD) as declared by the file.
    pub validity_stop: f64,
    /// Revision containing the start of validity.
    pub revision: i64,
    /// Storage serial derived from `revision`.
    pub serial: Serial,
}

/// Resolves version, validity and serial from a file's metadata.
#[derive(Clone)]
pub struct RevisionResolver {
    converter: Arc<dyn TimeConverter>,
}

impl RevisionResolver {
    /// Creates a resolver converting times through `converter`.
    pub fn new(converter: Arc<dyn TimeConverter>) -> Self {
        Self { converter }
    }

    /// Resolves a decoded container read from `path`.
    pub fn resolve(&self, path: &Path, container: &Container) -> IcResult<Resolution> {
        let validity_start = numeric_key(path, container, VSTART)?;
        let validity_stop = numeric_key(path, container, VSTOP)?;
        let version = unique_key(path, container, VERSION)?
            .as_i64()
            .map(Version)
            .ok_or_else(|| IcError::InconsistentMetadata {
                path: path.to_path_buf(),
                key: VERSION.to_string(),
                reason: "is not an integer".to_string(),
            })?;

        let revision = self.converter.ijd_to_revision(validity_start)?;
        let serial = Serial::from_revision(revision);
        if serial.is_static() && revision != i64::from(STATIC_SERIAL) {
            warn!(
                path = %path.display(),
                revision,
                "revision outside plausible range, storing under static serial"
            );
        }
        debug!(path = %path.display(), %version, revision, %serial, "resolved");

        Ok(Resolution {
            version,
            validity_start,
            validity_stop,
            revision,
            serial,
        })
    }
}

/// The single value of `key` across every section that carries it.
pub fn unique_key(path: &Path, container: &Container, key: &str) -> IcResult<HeaderValue> {
    let mut distinct: Vec<&HeaderValue> = Vec::new();
    for value in container.header_values(key) {
        if !distinct.iter().any(|seen| same_value(seen, value)) {
            distinct.push(value);
        }
    }
    match distinct.as_slice() {
        [single] => Ok((*single).clone()),
        [] => Err(IcError::InconsistentMetadata {
            path: path.to_path_buf(),
            key: key.to_string(),
            reason: "is missing from every section".to_string(),
        }),
        many => Err(IcError::InconsistentMetadata {
            path: path.to_path_buf(),
            key: key.to_string(),
            reason: format!(
                "has {} distinct values: {}",
                many.len(),
                many.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
            ),
        }),
    }
}

/// Numbers compare by value, so `1` and `1.0` are the same.
fn same_value(a: &HeaderValue, b: &HeaderValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric_key(path: &Path, container: &Container, key: &str) -> IcResult<f64> {
    unique_key(path, container, key)?
        .as_f64()
        .ok_or_else(|| IcError::InconsistentMetadata {
            path: path.to_path_buf(),
            key: key.to_string(),
            reason: "is not numeric".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Section;

    struct Fixed(i64);

    impl TimeConverter for Fixed {
        fn ijd_to_revision(&self, _ijd: f64) -> IcResult<i64> {
            Ok(self.0)
        }
    }

    fn calibration(start: f64, stop: f64, version: i64) -> Container {
        let mut data = Section::named("ISGR-RISE-MOD");
        data.set_header(VSTART, start);
        data.set_header(VSTOP, stop);
        data.set_header(VERSION, version);
        Container::with_data_section(data)
    }

    #[test]
    fn test_serial_mapping() {
        assert_eq!(Serial::from_revision(665), Serial(665));
        assert_eq!(Serial::from_revision(1516), Serial(1516));
        assert_eq!(Serial::from_revision(0), Serial(0));
        assert_eq!(Serial::from_revision(8999), Serial(8999));
        assert_eq!(Serial::from_revision(-1), Serial(STATIC_SERIAL));
        assert_eq!(Serial::from_revision(9000), Serial(STATIC_SERIAL));
        assert_eq!(Serial::from_revision(12000), Serial(STATIC_SERIAL));
    }

    #[test]
    fn test_serial_display_is_zero_padded() {
        assert_eq!(Serial(42).to_string(), "0042");
        assert_eq!(Serial(1516).to_string(), "1516");
    }

    #[test]
    fn test_linear_clock() {
        let clock = LinearRevisionClock {
            epoch_ijd: 1000.0,
            period_days: 3.0,
        };
        assert_eq!(clock.ijd_to_revision(1000.0).unwrap(), 0);
        assert_eq!(clock.ijd_to_revision(1002.9).unwrap(), 0);
        assert_eq!(clock.ijd_to_revision(1003.0).unwrap(), 1);
        assert_eq!(clock.ijd_to_revision(997.0).unwrap(), -1);
        assert!(clock.ijd_to_revision(f64::NAN).is_err());
    }

    #[test]
    fn test_resolve_uses_start_revision() {
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        let res = resolver
            .resolve(Path::new("f.json"), &calibration(3000.0, 3003.0, 2))
            .unwrap();
        assert_eq!(res.version, Version(2));
        assert_eq!(res.revision, 665);
        assert_eq!(res.serial, Serial(665));
        assert_eq!(res.validity_stop, 3003.0);
    }

    #[test]
    fn test_resolve_falls_back_to_static_serial() {
        let resolver = RevisionResolver::new(Arc::new(Fixed(12000)));
        let res = resolver
            .resolve(Path::new("f.json"), &calibration(0.0, 99999.0, 1))
            .unwrap();
        assert_eq!(res.serial, Serial(STATIC_SERIAL));
    }

    #[test]
    fn test_duplicate_but_equal_values_are_unique() {
        let mut container = calibration(3000.0, 3003.0, 1);
        container.sections[0].set_header(VERSION, 1i64);
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        assert!(resolver.resolve(Path::new("f.json"), &container).is_ok());
    }

    #[test]
    fn test_integer_and_float_spellings_are_one_value() {
        let mut container = calibration(3000.0, 3003.0, 1);
        container.sections[0].set_header(VERSION, 1.0);
        container.sections[0].set_header(VSTOP, 3003.0);
        container.sections[1].set_header(VSTOP, HeaderValue::Int(3003));
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        let res = resolver.resolve(Path::new("f.json"), &container).unwrap();
        assert_eq!(res.version, Version(1));
        assert_eq!(res.validity_stop, 3003.0);

        let version = unique_key(Path::new("f.json"), &container, VERSION).unwrap();
        assert_eq!(version.as_i64(), Some(1));
    }

    #[test]
    fn test_conflicting_versions_across_sections() {
        let mut container = calibration(3000.0, 3003.0, 1);
        container.sections[0].set_header(VERSION, 2i64);
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        let err = resolver.resolve(Path::new("f.json"), &container).unwrap_err();
        match err {
            IcError::InconsistentMetadata { key, .. } => assert_eq!(key, VERSION),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_validity_start() {
        let mut container = calibration(3000.0, 3003.0, 1);
        container.sections[1].header.remove(VSTART);
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        let err = resolver.resolve(Path::new("f.json"), &container).unwrap_err();
        assert!(matches!(err, IcError::InconsistentMetadata { .. }));
    }

    #[test]
    fn test_non_integer_version() {
        let mut container = calibration(3000.0, 3003.0, 1);
        container.sections[1].set_header(VERSION, "v1");
        let resolver = RevisionResolver::new(Arc::new(Fixed(665)));
        let err = resolver.resolve(Path::new("f.json"), &container).unwrap_err();
        assert!(matches!(err, IcError::InconsistentMetadata { .. }));
    }
}

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::SessionStatus;
use crate::measurement::TestResult;
use crate::network::PathDiagnostics;

const ID_SUFFIX_LEN: usize = 20;

/// `"<start ms, truncated>-<20 visible ASCII characters>"`
pub fn session_id(start_ms: f64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(rng.gen_range(35u8..93)))
        .collect();
    format!("{}-{}", start_ms.trunc() as i64, suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub timestamp: f64,
    pub reason: String,
}

/// One entry of the `tests` map of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Test(TestResult),
    Diagnostics(PathDiagnostics),
}

impl ReportEntry {
    /// `None` for entries that carry no force-stop marker at all.
    pub fn force_stopped(&self) -> Option<bool> {
        match self {
            ReportEntry::Test(result) => Some(result.force_stopped()),
            ReportEntry::Diagnostics(_) => None,
        }
    }
}

impl From<TestResult> for ReportEntry {
    fn from(result: TestResult) -> Self {
        ReportEntry::Test(result)
    }
}

impl From<PathDiagnostics> for ReportEntry {
    fn from(diag: PathDiagnostics) -> Self {
        ReportEntry::Diagnostics(diag)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    // Fields for the Session struct
    pub id: String,
    pub version: String,
    pub status: SessionStatus,
    pub start_timestamp: f64,
    pub failures: Vec<Failure>,
    pub tests: BTreeMap<String, ReportEntry>,
}

impl Session {
    pub fn new(start_timestamp: f64) -> Self {
        Self {
            id: session_id(start_timestamp),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: SessionStatus::Success,
            start_timestamp,
            failures: Vec::new(),
            tests: BTreeMap::new(),
        }
    }
}

/// Immutable snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub id: String,
    pub version: String,
    pub status: SessionStatus,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub failures: Vec<Failure>,
    pub tests: BTreeMap<String, ReportEntry>,
}

impl SessionReport {
    pub fn test(&self, name: &str) -> Option<&TestResult> {
        match self.tests.get(name) {
            Some(ReportEntry::Test(result)) => Some(result),
            _ => None,
        }
    }

    pub fn diagnostics(&self) -> Option<&PathDiagnostics> {
        match self.tests.get("ice") {
            Some(ReportEntry::Diagnostics(diag)) => Some(diag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = session_id(1_700_000_000_123.9);
        let (stamp, suffix) = id.split_once('-').unwrap();
        assert_eq!(stamp, "1700000000123");
        assert_eq!(suffix.len(), 20);
        assert!(suffix.bytes().all(|b| (35..93).contains(&b)));
    }

    #[test]
    fn test_new_session() {
        let session = Session::new(5.0);
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.version, env!("CARGO_PKG_VERSION"));
        assert!(session.failures.is_empty());
        assert!(session.tests.is_empty());
    }

    #[test]
    fn test_diagnostics_entry_has_no_force_stop_marker() {
        let entry = ReportEntry::from(PathDiagnostics::default());
        assert_eq!(entry.force_stopped(), None);
    }
}

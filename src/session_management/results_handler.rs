use std::fmt::Display;

use log::{debug, warn};

use super::session::{Failure, ReportEntry, Session, SessionReport};
use super::SessionStatus;
use crate::clock::Clock;

/// Sole writer of a [`Session`].
///
/// Status changes follow the precedence `Failed` > `Stopped` > `Success`:
/// - `set_status_failed` always applies
/// - `set_status_stopped` applies unless the session already failed
/// - `set_status_success` applies only while the session is still successful
pub struct ResultsAggregator {
    clock: Clock,
    session: Session,
}

impl ResultsAggregator {
    pub fn new(clock: Clock) -> Self {
        let session = Session::new(clock.now_ms());
        debug!("New diagnostic session {}", session.id);
        Self { clock, session }
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn set_status_failed(&mut self) {
        self.session.status = SessionStatus::Failed;
    }

    pub fn set_status_stopped(&mut self) {
        if self.session.status == SessionStatus::Failed {
            return;
        }
        self.session.status = SessionStatus::Stopped;
    }

    pub fn set_status_success(&mut self) {
        if self.session.status != SessionStatus::Success {
            return;
        }
        self.session.status = SessionStatus::Success;
    }

    /// Stores `entry` under `name`. An entry that was force-stopped promotes the status to
    /// stopped; entries without a force-stop marker never do.
    pub fn add(&mut self, name: &str, entry: impl Into<ReportEntry>) {
        let entry = entry.into();
        if entry.force_stopped() == Some(true) {
            self.set_status_stopped();
        }
        self.session.tests.insert(name.to_string(), entry);
    }

    pub fn failure(&mut self, reason: impl Display) {
        let reason = reason.to_string();
        warn!("Session {} failure: {}", self.session.id, reason);
        self.session.failures.push(Failure {
            timestamp: self.clock.now_ms(),
            reason,
        });
    }

    pub fn failure_count(&self) -> usize {
        self.session.failures.len()
    }

    pub fn get_results(&self) -> SessionReport {
        SessionReport {
            id: self.session.id.clone(),
            version: self.session.version.clone(),
            status: self.session.status,
            start_timestamp: self.session.start_timestamp,
            end_timestamp: self.clock.now_ms(),
            failures: self.session.failures.clone(),
            tests: self.session.tests.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::{ConnectError, ConnectFailure};
    use crate::measurement::types::{RttResult, TestResult};
    use crate::network::PathDiagnostics;
    use std::time::Duration;

    fn aggregator() -> ResultsAggregator {
        ResultsAggregator::new(Clock::new())
    }

    #[test]
    fn test_failed_is_sticky() {
        let mut agg = aggregator();
        agg.set_status_failed();
        agg.set_status_stopped();
        assert_eq!(agg.status(), SessionStatus::Failed);
        agg.set_status_success();
        assert_eq!(agg.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_success_then_stopped() {
        let mut agg = aggregator();
        agg.set_status_success();
        agg.set_status_stopped();
        assert_eq!(agg.status(), SessionStatus::Stopped);
        agg.set_status_success();
        assert_eq!(agg.status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_add_promotes_only_on_force_stop_marker() {
        let mut agg = aggregator();
        agg.add("ice", PathDiagnostics::default());
        agg.add("rtt", TestResult::Rtt(RttResult::default()));
        assert_eq!(agg.status(), SessionStatus::Success);

        agg.add(
            "rtt",
            TestResult::Rtt(RttResult {
                force_stopped: true,
                ..Default::default()
            }),
        );
        assert_eq!(agg.status(), SessionStatus::Stopped);
        // same key replaces
        assert_eq!(agg.get_results().tests.len(), 2);
    }

    #[test]
    fn test_failure_does_not_touch_status() {
        let mut agg = aggregator();
        agg.failure(ConnectError::continuable(ConnectFailure::NegotiationTimeout));
        agg.failure("plain reason");
        assert_eq!(agg.failure_count(), 2);
        assert_eq!(agg.status(), SessionStatus::Success);

        let report = agg.get_results();
        assert_eq!(report.failures[0].reason, "Negotiation timeout");
        assert_eq!(report.failures[1].reason, "plain reason");
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_timestamps() {
        let agg = aggregator();
        tokio::time::advance(Duration::from_millis(750)).await;
        let report = agg.get_results();
        assert!((report.end_timestamp - report.start_timestamp - 750.0).abs() < 1e-3);
        assert_eq!(report.id, agg.id());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("startTimestamp").is_some());
        assert!(json.get("failures").unwrap().as_array().unwrap().is_empty());
    }
}

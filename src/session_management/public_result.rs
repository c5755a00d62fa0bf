use serde::{Deserialize, Serialize};

use super::session::SessionReport;

/// Summary of a diagnostic session as handed back to callers of
/// [`crate::controller::controller_handler::ConnectivityController::start`].
///
/// Every measured field is `None` when the corresponding test produced no result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicResult {
    pub media_connectivity: bool,
    /// kbps
    pub throughput: Option<f64>,
    pub fractional_loss: Option<f64>,
    /// Median RTT in ms
    pub rtt: Option<f64>,
    /// Population standard deviation of the RTT samples in ms
    pub jitter: Option<f64>,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<f64>,
}

impl PublicResult {
    /// Derives the summary from a session report; `None` yields the defaults.
    pub fn from_report(report: Option<&SessionReport>, now_ms: f64) -> Self {
        let mut public = PublicResult {
            timestamp: now_ms,
            ..Default::default()
        };
        let report = match report {
            Some(report) => report,
            None => return public,
        };

        public.start_timestamp = Some(report.start_timestamp);
        public.end_timestamp = Some(report.end_timestamp);

        if let Some(rtt) = report.test("rtt").and_then(|t| t.as_rtt()) {
            public.rtt = Some(rtt.median);
            public.jitter = Some(rtt.variance);
            public.media_connectivity = true;
        }

        if let Some(tp) = report.test("throughput").and_then(|t| t.as_throughput()) {
            public.throughput = Some(tp.average);
            public.fractional_loss = Some(tp.fraction_lost_bytes.max(0.0));
            public.media_connectivity = true;
        }

        if report
            .diagnostics()
            .map(|diag| diag.any_relay_success())
            .unwrap_or(false)
        {
            public.media_connectivity = true;
        }

        public
    }
}

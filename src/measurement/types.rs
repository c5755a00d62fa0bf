use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestName {
    Rtt,
    Loss,
    Throughput,
}

impl TestName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestName::Rtt => "rtt",
            TestName::Loss => "loss",
            TestName::Throughput => "throughput",
        }
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RttResult {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub max_duration: f64,
    pub force_stopped: bool,
    pub sent_messages: u32,
    pub un_acked_messages: u32,
    pub max_messages: u32,
    pub median: f64,
    pub average: f64,
    /// Population standard deviation of the samples, reported as jitter
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LossResult {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub max_duration: f64,
    pub force_stopped: bool,
    pub sent_bytes: u64,
    pub bytes_received: u64,
    /// Total the far end claims to have seen sent, -1 when unknown
    pub bytes_sent: i64,
    pub fraction_lost_bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputInterval {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub bytes_received: u64,
    /// kbps
    pub average: f64,
    pub rtt: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputResult {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub max_duration: f64,
    pub force_stopped: bool,
    pub bytes_prepared: u64,
    pub bytes_received: u64,
    pub buffer_empty: u32,
    pub intervals: Vec<ThroughputInterval>,
    /// kbps
    pub average: f64,
    pub fraction_lost_bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TestResult {
    Rtt(RttResult),
    Loss(LossResult),
    Throughput(ThroughputResult),
}

impl TestResult {
    pub fn force_stopped(&self) -> bool {
        match self {
            TestResult::Rtt(r) => r.force_stopped,
            TestResult::Loss(r) => r.force_stopped,
            TestResult::Throughput(r) => r.force_stopped,
        }
    }

    pub fn as_rtt(&self) -> Option<&RttResult> {
        match self {
            TestResult::Rtt(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_loss(&self) -> Option<&LossResult> {
        match self {
            TestResult::Loss(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_throughput(&self) -> Option<&ThroughputResult> {
        match self {
            TestResult::Throughput(r) => Some(r),
            _ => None,
        }
    }
}

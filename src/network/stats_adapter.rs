//! Raw path statistics normalization.
//!
//! Statistics arrive in one of several shapes depending on the channel implementation:
//!
//! - legacy accessor reports, whose field names are enumerated and fetched one by one
//! - collections of flat records (a list, or a map keyed by record id)
//! - records whose `values` field is a list of single-key sub-records
//!
//! [`normalize`] turns any of them into flat [`StatsRecord`]s, [`classify`] sorts a record by
//! its `type` tag, and [`ice_candidate_report`] runs both and extracts the candidate view
//! used to build path diagnostics.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde_json::{Map, Value};

use super::candidate::{CandidateType, RelayTransport};

/// One flat statistics record.
pub type StatsRecord = Map<String, Value>;

/// A report that only exposes its fields through name enumeration and lookup.
pub trait LegacyStatsReport: Send {
    fn report_type(&self) -> Option<String>;
    fn timestamp(&self) -> Option<DateTime<Utc>>;
    fn names(&self) -> Vec<String>;
    fn stat(&self, name: &str) -> Option<Value>;
}

pub enum RawStats {
    Legacy(Vec<Box<dyn LegacyStatsReport>>),
    Records(Vec<StatsRecord>),
    Keyed(Map<String, Value>),
}

/// Flattens any raw shape into plain records.
pub fn normalize(raw: RawStats) -> Vec<StatsRecord> {
    match raw {
        RawStats::Legacy(reports) => reports
            .iter()
            .map(|report| normalize_legacy(report.as_ref()))
            .collect(),
        RawStats::Records(records) => records.into_iter().map(normalize_record).collect(),
        RawStats::Keyed(map) => map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Object(record) => Some(normalize_record(record)),
                _ => {
                    trace!("Skipping non-record stats entry {}", key);
                    None
                }
            })
            .collect(),
    }
}

fn normalize_legacy(report: &dyn LegacyStatsReport) -> StatsRecord {
    let mut record = StatsRecord::new();
    if let Some(ts) = report.timestamp() {
        record.insert(
            "timestamp".to_string(),
            Value::String(ts.timestamp_millis().to_string()),
        );
    }
    if let Some(kind) = report.report_type() {
        record.insert("type".to_string(), Value::String(kind));
    }
    for name in report.names() {
        if let Some(value) = report.stat(&name) {
            record.insert(name, value);
        }
    }
    merge_values(record)
}

fn normalize_record(record: StatsRecord) -> StatsRecord {
    merge_values(record)
}

fn merge_values(mut record: StatsRecord) -> StatsRecord {
    if let Some(Value::Array(values)) = record.remove("values") {
        for entry in values {
            if let Value::Object(fields) = entry {
                record.extend(fields);
            }
        }
    }
    record
}

/// Candidate as reported by statistics (not by a descriptor).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateStats {
    pub id: String,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub candidate_type: Option<CandidateType>,
    pub priority: Option<u32>,
    /// Lower-case relay transport: `udp`, `tcp`, `tls` or `none`
    pub relay_transport: Option<String>,
    pub network_type: Option<String>,
}

impl CandidateStats {
    fn from_record(record: &StatsRecord) -> Self {
        Self {
            id: str_field(record, &["id"]).unwrap_or_default(),
            ip: str_field(record, &["ip", "address", "ipAddress"]),
            port: u32_field(record, &["port", "portNumber"]).and_then(|p| u16::try_from(p).ok()),
            candidate_type: str_field(record, &["candidateType"])
                .map(|t| CandidateType::from_token(&t)),
            priority: u32_field(record, &["priority"]),
            relay_transport: str_field(record, &["mozLocalTransport", "relayProtocol"]),
            network_type: str_field(record, &["networkType"]),
        }
    }

    pub fn is_relay(&self) -> bool {
        self.candidate_type == Some(CandidateType::Relay)
    }

    pub fn is_server_reflexive(&self) -> bool {
        self.candidate_type == Some(CandidateType::Srflx)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidatePairStats {
    pub id: String,
    pub kind: String,
    pub local_candidate_id: Option<String>,
    pub remote_candidate_id: Option<String>,
    pub state: Option<String>,
    pub selected: bool,
    pub active_connection: bool,
}

impl CandidatePairStats {
    fn from_record(record: &StatsRecord) -> Self {
        Self {
            id: str_field(record, &["id"]).unwrap_or_default(),
            kind: str_field(record, &["type"]).unwrap_or_default(),
            local_candidate_id: str_field(record, &["localCandidateId"]),
            remote_candidate_id: str_field(record, &["remoteCandidateId"]),
            state: str_field(record, &["state"]),
            selected: bool_field(record, "selected"),
            active_connection: bool_field(record, "googActiveConnection"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_connection || self.selected
    }

    pub fn succeeded(&self) -> bool {
        self.state.as_deref() == Some("succeeded")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    pub ssrc: Option<Value>,
    pub direction: StreamDirection,
    pub remote_report: bool,
    pub data: StatsRecord,
}

/// A record sorted by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedStats {
    LocalCandidate(CandidateStats),
    RemoteCandidate(CandidateStats),
    CandidatePair(CandidatePairStats),
    /// `transport` records carry the selected pair id; `googCandidatePair` and a selected
    /// legacy `candidatepair` are pair records reported at transport level
    Transport {
        pair: CandidatePairStats,
        selected_pair_id: Option<String>,
    },
    Track(TrackStats),
    TrackAttachment(StatsRecord),
    Codec(StatsRecord),
}

/// Classifies a normalized record. Unrecognized types yield `None`.
pub fn classify(record: StatsRecord) -> Option<ClassifiedStats> {
    let kind = str_field(&record, &["type"])?;
    let is_type = |expected: &[&str]| expected.contains(&kind.as_str());

    let inbound = is_type(&["inbound-rtp", "inboundrtp"]);
    let classified = if inbound || is_type(&["outbound-rtp", "outboundrtp"]) {
        let remote_report = bool_field(&record, "isRemote");
        ClassifiedStats::Track(TrackStats {
            ssrc: record.get("ssrc").cloned(),
            direction: if inbound {
                StreamDirection::Inbound
            } else {
                StreamDirection::Outbound
            },
            remote_report,
            data: record,
        })
    } else if is_type(&["candidatepair"]) && bool_field(&record, "selected") {
        ClassifiedStats::Transport {
            pair: CandidatePairStats::from_record(&record),
            selected_pair_id: None,
        }
    } else if is_type(&["localcandidate", "local-candidate"]) {
        ClassifiedStats::LocalCandidate(CandidateStats::from_record(&record))
    } else if is_type(&["remotecandidate", "remote-candidate"]) {
        ClassifiedStats::RemoteCandidate(CandidateStats::from_record(&record))
    } else if is_type(&["transport", "googCandidatePair"]) {
        ClassifiedStats::Transport {
            selected_pair_id: str_field(&record, &["selectedCandidatePairId"]),
            pair: CandidatePairStats::from_record(&record),
        }
    } else if is_type(&["track"]) {
        ClassifiedStats::TrackAttachment(record)
    } else if is_type(&["candidate-pair"]) {
        ClassifiedStats::CandidatePair(CandidatePairStats::from_record(&record))
    } else if is_type(&["codec"]) {
        ClassifiedStats::Codec(record)
    } else if is_type(&["ssrc"]) {
        let direction = if record.contains_key("bytesSent") {
            StreamDirection::Outbound
        } else {
            StreamDirection::Inbound
        };
        ClassifiedStats::Track(TrackStats {
            ssrc: record.get("ssrc").cloned(),
            direction,
            remote_report: false,
            data: record,
        })
    } else {
        trace!("Dropping stats record of type {}", kind);
        return None;
    };

    Some(classified)
}

/// Candidate-level view of one statistics snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IceCandidateReport {
    pub local_candidates: Vec<CandidateStats>,
    pub remote_candidates: Vec<CandidateStats>,
    pub candidate_pairs: Vec<CandidatePairStats>,
}

impl IceCandidateReport {
    pub fn local_candidate(&self, id: &str) -> Option<&CandidateStats> {
        self.local_candidates.iter().find(|cand| cand.id == id)
    }
}

/// Normalizes and classifies a raw snapshot into local/remote candidates and pairs.
///
/// Relay local candidates without a transport label get it from the top byte of their
/// priority. A pair named by a `transport` record's selected pair id is flagged active.
pub fn ice_candidate_report(raw: RawStats) -> IceCandidateReport {
    let mut report = IceCandidateReport::default();
    let mut selected_pair_id = None;

    for record in normalize(raw) {
        match classify(record) {
            Some(ClassifiedStats::CandidatePair(pair)) => report.candidate_pairs.push(pair),
            Some(ClassifiedStats::Transport {
                pair,
                selected_pair_id: selected,
            }) => {
                if pair.kind == "transport" {
                    selected_pair_id = selected;
                    continue;
                }
                report.candidate_pairs.push(pair);
            }
            Some(ClassifiedStats::LocalCandidate(mut cand)) => {
                if cand.is_relay() {
                    let label = match cand.relay_transport.take() {
                        Some(label) => label.to_lowercase(),
                        None => cand
                            .priority
                            .map(RelayTransport::from_priority)
                            .unwrap_or(RelayTransport::None)
                            .stats_label()
                            .to_string(),
                    };
                    cand.relay_transport = Some(label);
                }
                report.local_candidates.push(cand);
            }
            Some(ClassifiedStats::RemoteCandidate(cand)) => report.remote_candidates.push(cand),
            Some(_) | None => {}
        }
    }

    if let Some(selected) = selected_pair_id {
        for pair in report
            .candidate_pairs
            .iter_mut()
            .filter(|pair| pair.id == selected)
        {
            debug!("Marking candidate pair {} as active", pair.id);
            pair.active_connection = true;
        }
    }

    report
}

fn str_field(record: &StatsRecord, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match record.get(*name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn u32_field(record: &StatsRecord, names: &[&str]) -> Option<u32> {
    names.iter().find_map(|name| match record.get(*name) {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Booleans show up both as JSON booleans and as the string `"true"`.
fn bool_field(record: &StatsRecord, name: &str) -> bool {
    match record.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

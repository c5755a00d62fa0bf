//! Fixed-size test messages.
//!
//! Each message is a small JSON document carrying the send timestamp and the sender's
//! running byte count, padded with random alphanumeric filler so that compression on the
//! path cannot skew the measured volume.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;

pub struct PayloadGenerator {
    size: usize,
    padding: String,
}

impl PayloadGenerator {
    pub fn new(size: usize) -> Self {
        let padding = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(size)
            .map(char::from)
            .collect();
        Self { size, padding }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Builds a message of exactly `size` bytes, unless the header alone is longer.
    pub fn make(&self, timestamp: f64, sent_bytes: u64) -> String {
        let head = format!(
            "{{\"timestamp\":{},\"sentBytes\":{},\"padding\":\"",
            timestamp, sent_bytes
        );
        let fill = self.size.saturating_sub(head.len() + 2).min(self.padding.len());
        format!("{}{}\"}}", head, &self.padding[..fill])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub timestamp: f64,
    pub sent_bytes: u64,
}

impl Payload {
    pub fn parse(message: &str) -> Option<Self> {
        serde_json::from_str(message).ok()
    }
}

//! Session management core module.
//!
//! This module provides the session record of one diagnostic run, the aggregator that is
//! the only writer of that record, and the public summary derived from it.

use serde::{Deserialize, Serialize};

/// Submodule for the public summary handed back to callers.
pub mod public_result;
/// Submodule for the results aggregator.
pub mod results_handler;
/// Submodule for session data structures and utilities.
pub mod session;

/// Represents the overall status of a session.
///
/// Precedence is `Failed` > `Stopped` > `Success`; see
/// [`results_handler::ResultsAggregator`] for how it is enforced.
///
/// Variants:
/// - `Success`: every connection attempt so far led to a usable channel.
/// - `Stopped`: a test was force-stopped, usually because a call started.
/// - `Failed`: at least one connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Stopped,
    Failed,
}

//! The three diagnostic tests (RTT, loss, throughput), their shared state machine, and the
//! runner that drives one of them over a [`crate::network::Transport`].

pub mod loss_probe;
pub mod measurement_test;
pub mod payload;
pub mod rtt_probe;
pub mod runner;
pub mod test_state;
pub mod throughput_probe;
pub mod timers;
pub mod types;

pub use measurement_test::MeasurementTest;
pub use runner::{run_test, RunOutcome};
pub use test_state::TestState;
pub use types::{TestName, TestResult};

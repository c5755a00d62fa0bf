//! Orchestration of a diagnostic session: preconditions, connect/retry policy, the fixed
//! test sequence and the final summary.

pub mod controller_handler;

#[cfg(test)]
mod tests;

use std::fmt;

use log::trace;
use serde::Serialize;

use crate::error_handling::types::ProbeError;

/// Lifecycle of one measurement test.
///
/// ```text
/// Idle ──start──▶ Active ──stop──▶ Stopped
///                   │                 │
///                   ├──▶ Finished ◀───┤
///                   └──▶ Failed   ◀───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestState {
    Idle,
    Active,
    Stopped,
    Finished,
    Failed,
}

impl TestState {
    pub fn can_transition_to(self, next: TestState) -> bool {
        use TestState::*;
        matches!(
            (self, next),
            (Idle, Active)
                | (Active, Stopped)
                | (Active, Finished)
                | (Active, Failed)
                | (Stopped, Finished)
                | (Stopped, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TestState::Finished | TestState::Failed)
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Called once when a test finishes or fails.
pub type Completion = Box<dyn FnOnce(Result<(), ProbeError>) + Send>;

/// State shared by every test variant: the explicit state machine plus the completion
/// handle, which is taken on the first terminal transition so it can fire only once.
pub struct TestCore {
    state: TestState,
    completion: Option<Completion>,
    force_stopped: bool,
}

impl TestCore {
    pub fn new() -> Self {
        Self {
            state: TestState::Idle,
            completion: None,
            force_stopped: false,
        }
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TestState::Active
    }

    pub fn force_stopped(&self) -> bool {
        self.force_stopped
    }

    pub(crate) fn mark_force_stopped(&mut self) {
        self.force_stopped = true;
    }

    /// The only way the state changes. Invalid moves are rejected and leave the state as is.
    pub fn transition(&mut self, next: TestState) -> Result<(), ProbeError> {
        if !self.state.can_transition_to(next) {
            return Err(ProbeError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        trace!("Test state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn start(&mut self, completion: Completion) -> Result<(), ProbeError> {
        self.transition(TestState::Active)?;
        self.completion = Some(completion);
        self.force_stopped = false;
        Ok(())
    }

    /// Active -> Stopped. Returns `false` when the test was not active.
    pub fn stop(&mut self) -> bool {
        self.transition(TestState::Stopped).is_ok()
    }

    pub fn finish(&mut self) {
        self.complete(TestState::Finished, Ok(()));
    }

    pub fn fail(&mut self, err: ProbeError) {
        self.complete(TestState::Failed, Err(err));
    }

    fn complete(&mut self, next: TestState, result: Result<(), ProbeError>) {
        if self.transition(next).is_err() {
            trace!("Ignoring late completion in state {}", self.state);
            return;
        }
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }
}

impl Default for TestCore {
    fn default() -> Self {
        Self::new()
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contract::{RequestType, StatementOutcome};

/// Per-invocation state: `Pending -> Executing -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunnerState {
    Pending,
    Executing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RunnerState,
    pub to: RunnerState,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(self, next: RunnerState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Pending, Self::Failed)
                | (Self::Executing, Self::Succeeded)
                | (Self::Executing, Self::Failed)
        )
    }

    pub fn transition(self, next: RunnerState) -> Result<RunnerState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// What one invocation did, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionReport {
    pub request_type: RequestType,
    pub state: RunnerState,
    pub outcomes: Vec<StatementOutcome>,
}

impl ExecutionReport {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            state: RunnerState::Pending,
            outcomes: Vec::new(),
        }
    }

    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(RunnerState::Executing)?;
        Ok(())
    }

    pub fn record(&mut self, outcome: StatementOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeed(&mut self) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(RunnerState::Succeeded)?;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(RunnerState::Failed)?;
        Ok(())
    }

    pub fn statements_executed(&self) -> usize {
        self.outcomes.len()
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! Retry accounting for probe commands

use protocol::CompletionStatus;

/// How a failed completion should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-issuing the same command may succeed
    Transient,
    /// The device answered; asking again will not change the answer
    Permanent,
}

/// Classify a completion status, `None` for success
pub fn classify(status: &CompletionStatus) -> Option<ErrorClass> {
    match status {
        CompletionStatus::Ok => None,
        CompletionStatus::Timeout | CompletionStatus::Requeue => Some(ErrorClass::Transient),
        CompletionStatus::DeviceError { .. } | CompletionStatus::NoDevice => {
            Some(ErrorClass::Permanent)
        }
    }
}

/// Re-submissions left for the command of the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    limit: u32,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Refill for a new state
    pub fn reset(&mut self) {
        self.remaining = self.limit;
    }

    /// Take one retry if any is left
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.limit - self.remaining
    }
}

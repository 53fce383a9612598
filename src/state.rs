//! Capture lifecycle state machine and open-retry policy.

use std::time::Duration;

use tracing::{debug, error};

use crate::traits::{CaptureError, Result};

/// Lifecycle state of a capturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No device is open and nothing is pending.
    #[default]
    Idle,
    /// A device open is in progress; `attempt` counts from 1.
    Opening {
        /// Current open attempt.
        attempt: u32,
    },
    /// Device open and streaming.
    Running,
    /// Releasing the current device before opening the next one.
    Switching,
    /// Tearing down.
    Stopping,
}

impl CaptureState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle | Self::Switching, Self::Opening { attempt }) => attempt == 1,
            (Self::Opening { attempt: current }, Self::Opening { attempt }) => {
                attempt == current + 1
            }
            (Self::Opening { .. }, Self::Running)
            | (Self::Running, Self::Switching)
            | (
                Self::Opening { .. } | Self::Running | Self::Switching,
                Self::Stopping | Self::Idle,
            )
            | (Self::Stopping, Self::Idle) => true,
            _ => false,
        }
    }
}

/// Bounded retry policy for device open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// What to do after a failed open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRetry {
    /// Try again after `delay` as attempt number `attempt`.
    Retry {
        /// Attempt number of the retry.
        attempt: u32,
        /// Delay before retrying.
        delay: Duration,
    },
    /// Ceiling reached.
    GiveUp,
}

/// Lifecycle tracker. Lives on the capture worker.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: CaptureState,
    policy: RetryPolicy,
}

impl StateMachine {
    /// Create an idle state machine.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: CaptureState::Idle,
            policy,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Move to `next`, refusing illegal transitions.
    pub fn transition(&mut self, next: CaptureState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            error!(from = ?self.state, to = ?next, "Illegal capture state transition");
            return Err(CaptureError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Capture state transition");
        self.state = next;
        Ok(())
    }

    /// Decide what follows a failed open attempt.
    ///
    /// Only meaningful while `Opening`; any other state gives up.
    #[must_use]
    pub const fn next_attempt(&self) -> OpenRetry {
        match self.state {
            CaptureState::Opening { attempt } if attempt < self.policy.max_attempts => {
                OpenRetry::Retry {
                    attempt: attempt + 1,
                    delay: self.policy.delay,
                }
            }
            _ => OpenRetry::GiveUp,
        }
    }

    /// Force the machine back to idle after teardown.
    pub fn reset(&mut self) {
        if self.state != CaptureState::Idle {
            debug!(from = ?self.state, "Capture state reset to idle");
        }
        self.state = CaptureState::Idle;
    }
}

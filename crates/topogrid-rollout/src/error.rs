//! Rollout error types.

use thiserror::Error;

/// Errors from driving the deployment state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RolloutError {
    #[error("a rollout is already in progress ({0})")]
    InProgress(String),

    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: String },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

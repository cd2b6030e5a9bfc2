//! Shift policies: how traffic moves from blue to green.

use std::time::Duration;

use crate::error::{RolloutError, RolloutResult};

/// How traffic is shifted to the new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ShiftPolicy {
    /// Add `step_percent` every `interval_minutes` until 100%.
    Linear {
        step_percent: u8,
        interval_minutes: u32,
    },
    /// Shift `first_percent`, then the rest after `interval_minutes`.
    Canary {
        first_percent: u8,
        interval_minutes: u32,
    },
    /// Move all traffic in one step.
    AllAtOnce,
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self::Linear {
            step_percent: 10,
            interval_minutes: 5,
        }
    }
}

impl ShiftPolicy {
    /// The predefined canary policy: 10% first, the rest 5 minutes later.
    pub fn canary_10_percent_5_minutes() -> Self {
        Self::Canary {
            first_percent: 10,
            interval_minutes: 5,
        }
    }

    /// Green's share after the next step from `current`.
    pub fn next_percent(&self, current: u8) -> u8 {
        match *self {
            ShiftPolicy::Linear { step_percent, .. } => current.saturating_add(step_percent).min(100),
            ShiftPolicy::Canary { first_percent, .. } => {
                if current == 0 {
                    first_percent
                } else {
                    100
                }
            }
            ShiftPolicy::AllAtOnce => 100,
        }
    }

    /// Time between steps.
    pub fn interval(&self) -> Duration {
        match *self {
            ShiftPolicy::Linear {
                interval_minutes, ..
            }
            | ShiftPolicy::Canary {
                interval_minutes, ..
            } => minutes(interval_minutes),
            ShiftPolicy::AllAtOnce => Duration::ZERO,
        }
    }

    /// Name of the provider's predefined configuration, if one matches.
    pub fn predefined_name(&self) -> Option<&'static str> {
        match *self {
            ShiftPolicy::AllAtOnce => Some("CodeDeployDefault.ECSAllAtOnce"),
            ShiftPolicy::Canary {
                first_percent: 10,
                interval_minutes: 5,
            } => Some("CodeDeployDefault.ECSCanary10Percent5Minutes"),
            ShiftPolicy::Canary {
                first_percent: 10,
                interval_minutes: 15,
            } => Some("CodeDeployDefault.ECSCanary10Percent15Minutes"),
            ShiftPolicy::Linear {
                step_percent: 10,
                interval_minutes: 1,
            } => Some("CodeDeployDefault.ECSLinear10PercentEvery1Minutes"),
            ShiftPolicy::Linear {
                step_percent: 10,
                interval_minutes: 3,
            } => Some("CodeDeployDefault.ECSLinear10PercentEvery3Minutes"),
            _ => None,
        }
    }

    /// Short slug for a custom configuration name.
    pub fn slug(&self) -> String {
        match *self {
            ShiftPolicy::Linear {
                step_percent,
                interval_minutes,
            } => format!("linear-{step_percent}pct-every-{interval_minutes}min"),
            ShiftPolicy::Canary {
                first_percent,
                interval_minutes,
            } => format!("canary-{first_percent}pct-{interval_minutes}min"),
            ShiftPolicy::AllAtOnce => "all-at-once".to_string(),
        }
    }

    pub fn validate(&self) -> RolloutResult<()> {
        match *self {
            ShiftPolicy::Linear {
                step_percent: p,
                interval_minutes: m,
            }
            | ShiftPolicy::Canary {
                first_percent: p,
                interval_minutes: m,
            } => {
                if !(1..=99).contains(&p) {
                    return Err(RolloutError::InvalidPolicy(format!(
                        "shift percentage must be in 1..=99, got {p}"
                    )));
                }
                if m == 0 {
                    return Err(RolloutError::InvalidPolicy(
                        "shift interval must be at least one minute".to_string(),
                    ));
                }
                Ok(())
            }
            ShiftPolicy::AllAtOnce => Ok(()),
        }
    }
}

/// A shift policy plus the bake window that follows a full shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RolloutPolicy {
    pub shift: ShiftPolicy,
    /// How long blue stays alive after green takes all traffic.
    pub termination_wait_minutes: u32,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            shift: ShiftPolicy::default(),
            termination_wait_minutes: 5,
        }
    }
}

impl RolloutPolicy {
    pub fn termination_wait(&self) -> Duration {
        minutes(self.termination_wait_minutes)
    }

    pub fn validate(&self) -> RolloutResult<()> {
        self.shift.validate()?;
        // The provider caps the wait at two days.
        if self.termination_wait_minutes > 2880 {
            return Err(RolloutError::InvalidPolicy(format!(
                "termination wait must be at most 2880 minutes, got {}",
                self.termination_wait_minutes
            )));
        }
        Ok(())
    }
}

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

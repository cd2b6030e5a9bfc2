//! topogrid-rollout: staged blue/green deployments.
//!
//! This crate makes the traffic-shifting deployment explicit: a policy
//! says how fast traffic moves from the live (blue) target group to the
//! candidate (green) one, and a state machine tracks where a rollout is.
//!
//! ```text
//! Idle ──begin──▶ ShiftingTraffic(p) ──interval──▶ ShiftingTraffic(p + step)
//!                        │                                │ p = 100
//!                        │ alarm / abort                  ▼
//!                        ▼                             Baking ──wait──▶ Finalized
//!                    RolledBack ◀──────alarm / manual─────┘
//! ```
//!
//! # Components
//!
//! - **`strategy`**: Shift policies (Linear, Canary, AllAtOnce) and bake timing
//! - **`controller`**: Deployment state machine (begin, advance, rollback)

pub mod controller;
pub mod error;
pub mod strategy;

pub use controller::{
    AlarmStatus, DeploymentPhase, DeploymentState, ShiftAction, TargetGroupPair, TrafficSplit,
};
pub use error::{RolloutError, RolloutResult};
pub use strategy::{RolloutPolicy, ShiftPolicy};

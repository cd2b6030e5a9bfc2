//! topogrid-autoscale: the scaling policy set of a compute service.
//!
//! Two target-tracking triggers bound the same instance range. Each one
//! independently computes the instance count it demands; the effective
//! count is the larger of the two, clamped to `[min, max]`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu_demand     = ceil(current * cpu_utilization / cpu_target)
//! request_demand = ceil(current * requests_per_instance / request_target)
//!
//! desired = clamp(max(cpu_demand, request_demand), min, max)
//! ```
//!
//! Taking the maximum (never the average) biases toward over-provisioning
//! when the two signals disagree. Cooldown windows keep the
//! `Autoscaler` from oscillating.

pub mod policy;
pub mod scaler;

pub use policy::{CpuTrigger, RequestRateTrigger, ScalingPolicySet, ScalingSignals};
pub use scaler::{Autoscaler, Cooldowns, ScaleDecision};

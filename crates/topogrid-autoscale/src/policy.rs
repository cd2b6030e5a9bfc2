//! Scaling triggers and their combination.

use serde::{Deserialize, Serialize};

/// Requests per instance the request-rate trigger aims for.
pub const DEFAULT_REQUESTS_PER_INSTANCE: u32 = 1000;

/// Live signals observed for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingSignals {
    /// Instances currently running.
    pub current_instances: u32,
    /// Average CPU utilization across instances, 0-100.
    pub cpu_utilization_percent: f64,
    /// Requests per instance over the evaluation period.
    pub requests_per_instance: f64,
}

/// Target tracking on average CPU utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTrigger {
    pub min: u32,
    pub max: u32,
    pub target_percent: u32,
}

impl CpuTrigger {
    /// Instances needed to bring utilization back to the target.
    pub fn demand(&self, signals: &ScalingSignals) -> u32 {
        proportional_demand(
            signals.current_instances,
            signals.cpu_utilization_percent,
            f64::from(self.target_percent),
        )
    }
}

/// Target tracking on load-balancer requests per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRateTrigger {
    pub min: u32,
    pub max: u32,
    pub requests_per_instance: u32,
}

impl RequestRateTrigger {
    /// Instances needed to serve the observed load at the target rate.
    pub fn demand(&self, signals: &ScalingSignals) -> u32 {
        proportional_demand(
            signals.current_instances,
            signals.requests_per_instance,
            f64::from(self.requests_per_instance),
        )
    }
}

/// Both triggers of a service. They always share one instance range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicySet {
    pub cpu: CpuTrigger,
    pub request_rate: RequestRateTrigger,
}

impl ScalingPolicySet {
    pub fn new(min: u32, max: u32, cpu_target_percent: u32, requests_per_instance: u32) -> Self {
        Self {
            cpu: CpuTrigger {
                min,
                max,
                target_percent: cpu_target_percent,
            },
            request_rate: RequestRateTrigger {
                min,
                max,
                requests_per_instance,
            },
        }
    }

    pub fn min(&self) -> u32 {
        self.cpu.min
    }

    pub fn max(&self) -> u32 {
        self.cpu.max
    }

    /// Combine two demands: the larger wins, clamped to `[min, max]`.
    pub fn combine(&self, cpu_demand: u32, request_demand: u32) -> u32 {
        cpu_demand
            .max(request_demand)
            .clamp(self.min(), self.max())
    }

    /// Evaluate both triggers and combine their demands.
    pub fn desired_count(&self, signals: &ScalingSignals) -> u32 {
        self.combine(self.cpu.demand(signals), self.request_rate.demand(signals))
    }
}

fn proportional_demand(current: u32, observed: f64, target: f64) -> u32 {
    if target <= 0.0 || !observed.is_finite() || observed <= 0.0 {
        return 0;
    }
    // Nothing running yet: any load needs at least one instance.
    let base = f64::from(current.max(1));
    let desired = (base * observed / target).ceil();
    if desired >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        desired as u32
    }
}

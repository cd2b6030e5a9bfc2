//! Topology parameters: the only input to synthesis.

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// Longest accepted service name. Load balancer and target group names
/// are capped at 32 characters and carry a suffix such as `-canary`.
pub const MAX_SERVICE_NAME_LEN: usize = 24;

/// Upper bound on availability zones a network may span.
pub const MAX_ZONES: u8 = 6;

/// Parameters from which the whole topology is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyParameters {
    pub service_name: String,
    /// Desired instance count at creation and the scaling floor.
    pub min_task_count: u32,
    /// Scaling ceiling.
    pub max_task_count: u32,
    /// CPU target-tracking setpoint, 1..=100.
    pub cpu_target_percent: u32,
    /// Hand deployments to the external staged-deployment controller.
    pub enable_progressive_deployment: bool,
    /// Attach the trace/metric collector sidecar.
    pub enable_tracing_sidecar: bool,
    pub ci_org: String,
    pub ci_repo: String,
    /// Availability zones the network spans.
    pub max_zones: u8,
}

impl Default for TopologyParameters {
    fn default() -> Self {
        Self {
            service_name: "sample-service".to_string(),
            min_task_count: 1,
            max_task_count: 5,
            cpu_target_percent: 55,
            enable_progressive_deployment: false,
            enable_tracing_sidecar: false,
            ci_org: "your-org".to_string(),
            ci_repo: "your-repo".to_string(),
            max_zones: 3,
        }
    }
}

impl TopologyParameters {
    /// Check every invariant, reporting the first one violated.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !is_service_name(&self.service_name) {
            return Err(ParameterError::InvalidServiceName(self.service_name.clone()));
        }
        if self.min_task_count < 1 {
            return Err(ParameterError::MinTaskCountZero(self.min_task_count));
        }
        if self.max_task_count < self.min_task_count {
            return Err(ParameterError::MaxBelowMin {
                min: self.min_task_count,
                max: self.max_task_count,
            });
        }
        if !(1..=100).contains(&self.cpu_target_percent) {
            return Err(ParameterError::CpuTargetOutOfRange(self.cpu_target_percent));
        }
        if !is_ci_segment(&self.ci_org) {
            return Err(ParameterError::InvalidCiOrg(self.ci_org.clone()));
        }
        if !is_ci_segment(&self.ci_repo) {
            return Err(ParameterError::InvalidCiRepo(self.ci_repo.clone()));
        }
        if !(1..=MAX_ZONES).contains(&self.max_zones) {
            return Err(ParameterError::MaxZonesOutOfRange(self.max_zones));
        }
        Ok(())
    }

    /// Name of the stack the graph is deployed as.
    pub fn stack_name(&self) -> String {
        format!("{}-stack", self.service_name)
    }
}

fn is_service_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= MAX_SERVICE_NAME_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Org and repo end up inside a `StringLike` subject pattern, so glob
/// metacharacters must never get through.
fn is_ci_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TopologyParameters::default().validate().unwrap();
    }

    #[test]
    fn max_below_min_is_rejected() {
        let params = TopologyParameters {
            min_task_count: 4,
            max_task_count: 2,
            ..Default::default()
        };
        assert_eq!(
            params.validate(),
            Err(ParameterError::MaxBelowMin { min: 4, max: 2 })
        );
    }

    #[test]
    fn equal_bounds_are_accepted() {
        let params = TopologyParameters {
            min_task_count: 3,
            max_task_count: 3,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_min_is_rejected() {
        let params = TopologyParameters {
            min_task_count: 0,
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(ParameterError::MinTaskCountZero(0)));
    }

    #[test]
    fn cpu_target_bounds() {
        for bad in [0, 101] {
            let params = TopologyParameters {
                cpu_target_percent: bad,
                ..Default::default()
            };
            assert_eq!(
                params.validate(),
                Err(ParameterError::CpuTargetOutOfRange(bad))
            );
        }
        let params = TopologyParameters {
            cpu_target_percent: 100,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn service_name_rules() {
        for bad in ["", "Api", "9lives", "api_v2", "a-very-long-service-name-indeed"] {
            let params = TopologyParameters {
                service_name: bad.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(params.validate(), Err(ParameterError::InvalidServiceName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn ci_segments_reject_glob_characters() {
        let params = TopologyParameters {
            ci_repo: "*".to_string(),
            ..Default::default()
        };
        assert_eq!(
            params.validate(),
            Err(ParameterError::InvalidCiRepo("*".to_string()))
        );

        let params = TopologyParameters {
            ci_org: "acme/other".to_string(),
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParameterError::InvalidCiOrg(_))));
    }

    #[test]
    fn zone_count_bounds() {
        let params = TopologyParameters {
            max_zones: 0,
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(ParameterError::MaxZonesOutOfRange(0)));
    }

    #[test]
    fn stack_name_derives_from_service() {
        assert_eq!(TopologyParameters::default().stack_name(), "sample-service-stack");
    }
}

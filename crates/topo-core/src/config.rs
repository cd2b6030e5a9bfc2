//! topology.toml configuration parser.
//!
//! Every field is optional. Missing values fall back to
//! `TopologyParameters::default()`; CLI flags are layered on top by the
//! caller.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::params::TopologyParameters;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub service: Option<ServiceConfig>,
    pub scaling: Option<ScalingConfig>,
    pub features: Option<FeaturesConfig>,
    pub ci: Option<CiConfig>,
    pub network: Option<NetworkConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_task_count: Option<u32>,
    pub max_task_count: Option<u32>,
    pub cpu_target_percent: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    pub progressive_deployment: Option<bool>,
    pub tracing_sidecar: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiConfig {
    pub org: Option<String>,
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub max_zones: Option<u8>,
}

impl TopologyConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TopologyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve against the defaults. Does not validate.
    pub fn to_parameters(&self) -> TopologyParameters {
        let defaults = TopologyParameters::default();
        let service = self.service.clone().unwrap_or_default();
        let scaling = self.scaling.clone().unwrap_or_default();
        let features = self.features.clone().unwrap_or_default();
        let ci = self.ci.clone().unwrap_or_default();
        let network = self.network.clone().unwrap_or_default();

        TopologyParameters {
            service_name: service.name.unwrap_or(defaults.service_name),
            min_task_count: scaling.min_task_count.unwrap_or(defaults.min_task_count),
            max_task_count: scaling.max_task_count.unwrap_or(defaults.max_task_count),
            cpu_target_percent: scaling
                .cpu_target_percent
                .unwrap_or(defaults.cpu_target_percent),
            enable_progressive_deployment: features
                .progressive_deployment
                .unwrap_or(defaults.enable_progressive_deployment),
            enable_tracing_sidecar: features
                .tracing_sidecar
                .unwrap_or(defaults.enable_tracing_sidecar),
            ci_org: ci.org.unwrap_or(defaults.ci_org),
            ci_repo: ci.repo.unwrap_or(defaults.ci_repo),
            max_zones: network.max_zones.unwrap_or(defaults.max_zones),
        }
    }

    /// Scaffold a topology.toml with every default spelled out.
    pub fn scaffold(service_name: &str, ci_org: &str, ci_repo: &str) -> Self {
        let defaults = TopologyParameters::default();
        TopologyConfig {
            service: Some(ServiceConfig {
                name: Some(service_name.to_string()),
            }),
            scaling: Some(ScalingConfig {
                min_task_count: Some(defaults.min_task_count),
                max_task_count: Some(defaults.max_task_count),
                cpu_target_percent: Some(defaults.cpu_target_percent),
            }),
            features: Some(FeaturesConfig {
                progressive_deployment: Some(false),
                tracing_sidecar: Some(false),
            }),
            ci: Some(CiConfig {
                org: Some(ci_org.to_string()),
                repo: Some(ci_repo.to_string()),
            }),
            network: Some(NetworkConfig {
                max_zones: Some(defaults.max_zones),
            }),
        }
    }
}

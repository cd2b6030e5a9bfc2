//! Parameter resolution: defaults, then topology.toml, then flags.

use std::path::Path;

use anyhow::Context;
use clap::Args;
use topo_core::{TopologyConfig, TopologyParameters};

pub const CONFIG_FILE: &str = "topology.toml";

#[derive(Debug, Clone, Default, Args)]
pub struct ParamFlags {
    /// Config file (default: ./topology.toml when present)
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(long)]
    pub service_name: Option<String>,
    #[arg(long)]
    pub min_tasks: Option<u32>,
    #[arg(long)]
    pub max_tasks: Option<u32>,
    /// CPU target-tracking setpoint, 1-100
    #[arg(long)]
    pub cpu_target: Option<u32>,
    /// Hand deployments to the staged blue/green controller
    #[arg(long, overrides_with = "no_progressive")]
    pub progressive: bool,
    /// Keep rolling deployments even if the config enables staged ones
    #[arg(long, overrides_with = "progressive")]
    pub no_progressive: bool,
    /// Attach the trace collector sidecar
    #[arg(long, overrides_with = "no_tracing")]
    pub tracing: bool,
    /// Leave the sidecar out even if the config enables it
    #[arg(long, overrides_with = "tracing")]
    pub no_tracing: bool,
    #[arg(long)]
    pub ci_org: Option<String>,
    #[arg(long)]
    pub ci_repo: Option<String>,
    #[arg(long)]
    pub max_zones: Option<u8>,
}

impl ParamFlags {
    /// Resolve the final parameters. Does not validate.
    pub fn resolve(&self) -> anyhow::Result<TopologyParameters> {
        let config = match &self.config {
            Some(path) => TopologyConfig::from_file(Path::new(path))
                .with_context(|| format!("reading {path}"))?,
            None if Path::new(CONFIG_FILE).is_file() => TopologyConfig::from_file(Path::new(CONFIG_FILE))
                .with_context(|| format!("reading {CONFIG_FILE}"))?,
            None => TopologyConfig::default(),
        };
        Ok(self.apply(config.to_parameters()))
    }

    /// Layer flags over `base`.
    pub fn apply(&self, base: TopologyParameters) -> TopologyParameters {
        TopologyParameters {
            service_name: self.service_name.clone().unwrap_or(base.service_name),
            min_task_count: self.min_tasks.unwrap_or(base.min_task_count),
            max_task_count: self.max_tasks.unwrap_or(base.max_task_count),
            cpu_target_percent: self.cpu_target.unwrap_or(base.cpu_target_percent),
            enable_progressive_deployment: switch(
                self.progressive,
                self.no_progressive,
                base.enable_progressive_deployment,
            ),
            enable_tracing_sidecar: switch(self.tracing, self.no_tracing, base.enable_tracing_sidecar),
            ci_org: self.ci_org.clone().unwrap_or(base.ci_org),
            ci_repo: self.ci_repo.clone().unwrap_or(base.ci_repo),
            max_zones: self.max_zones.unwrap_or(base.max_zones),
        }
    }
}

/// An `--x` / `--no-x` pair over a base value.
fn switch(on: bool, off: bool, base: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[service]
name = "orders"

[scaling]
min_task_count = 2
max_task_count = 4
"#,
        )
        .unwrap();

        let flags = ParamFlags {
            config: Some(path.display().to_string()),
            max_tasks: Some(10),
            progressive: true,
            ..Default::default()
        };
        let params = flags.resolve().unwrap();
        assert_eq!(params.service_name, "orders");
        assert_eq!(params.min_task_count, 2);
        assert_eq!(params.max_task_count, 10);
        assert!(params.enable_progressive_deployment);
        assert!(!params.enable_tracing_sidecar);
    }

    #[test]
    fn negated_flags_turn_config_features_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[features]\nprogressive_deployment = true\ntracing_sidecar = true\n",
        )
        .unwrap();

        let config = Some(path.display().to_string());
        let kept = ParamFlags {
            config: config.clone(),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert!(kept.enable_progressive_deployment);
        assert!(kept.enable_tracing_sidecar);

        let off = ParamFlags {
            config,
            no_progressive: true,
            no_tracing: true,
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert!(!off.enable_progressive_deployment);
        assert!(!off.enable_tracing_sidecar);
    }

    #[test]
    fn last_of_a_flag_pair_wins() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cmd {
            #[command(flatten)]
            params: ParamFlags,
        }

        let cmd = Cmd::try_parse_from(["topo", "--progressive", "--no-progressive", "--no-tracing", "--tracing"])
            .unwrap();
        let params = cmd.params.apply(TopologyParameters::default());
        assert!(!params.enable_progressive_deployment);
        assert!(params.enable_tracing_sidecar);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let flags = ParamFlags {
            config: Some("/nonexistent/topology.toml".to_string()),
            ..Default::default()
        };
        let err = flags.resolve().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/topology.toml"));
    }

    #[test]
    fn apply_keeps_base_when_no_flags() {
        let base = TopologyParameters {
            enable_tracing_sidecar: true,
            ..Default::default()
        };
        assert_eq!(ParamFlags::default().apply(base.clone()), base);
    }
}

use std::collections::BTreeMap;
use std::fmt::Write as _;

use topogrid_rollout::RolloutPolicy;
use topogrid_synth::{ComposeOptions, Delivery, Topology, compose_with};
use tracing::info;

use super::params::ParamFlags;
use super::{OutputFormat, PolicyArg};

pub fn validate(flags: &ParamFlags) -> anyhow::Result<()> {
    let params = flags.resolve()?;
    params.validate()?;
    println!(
        "✓ {} is valid ({}..={} tasks, cpu target {}%, {} zone(s), {} delivery)",
        params.service_name,
        params.min_task_count,
        params.max_task_count,
        params.cpu_target_percent,
        params.max_zones,
        if params.enable_progressive_deployment {
            "progressive"
        } else {
            "rolling"
        },
    );
    Ok(())
}

pub fn synth(
    flags: &ParamFlags,
    out: Option<&str>,
    format: OutputFormat,
    policy: PolicyArg,
) -> anyhow::Result<()> {
    let params = flags.resolve()?;
    info!(service = %params.service_name, ?format, ?policy, "synthesizing topology");
    let options = ComposeOptions {
        rollout: RolloutPolicy {
            shift: policy.shift(),
            ..Default::default()
        },
    };
    let topology = compose_with(&params, &options)?;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&topology.template())?,
        OutputFormat::Summary => summary(&topology)?,
    };

    match out {
        Some(path) => {
            std::fs::write(path, rendered)?;
            println!("✓ Wrote {} ({} resources)", path, topology.graph.len());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Resource counts by type, delivery mode and outputs.
pub fn summary(topology: &Topology) -> anyhow::Result<String> {
    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, resource) in topology.graph.iter() {
        *kinds.entry(resource.kind.as_str()).or_default() += 1;
    }

    let mut s = String::new();
    writeln!(s, "Stack: {}", topology.stack_name)?;
    writeln!(s, "Resources: {}", topology.graph.len())?;
    for (kind, count) in &kinds {
        writeln!(s, "  {count:>3}  {kind}")?;
    }

    match &topology.delivery {
        Delivery::Rolling => writeln!(s, "Delivery: rolling")?,
        Delivery::Progressive(p) => writeln!(
            s,
            "Delivery: progressive via {} ({}), state {}",
            p.deployment_group_name,
            p.deployment_config_name,
            p.state.phase()
        )?,
    }
    if let Some(sidecar) = &topology.observability.sidecar {
        writeln!(s, "Sidecar: {sidecar}")?;
    }
    writeln!(s, "CI subject: {}", topology.trust.condition.subject_pattern)?;

    writeln!(s, "Outputs:")?;
    for (name, output) in topology.graph.outputs() {
        writeln!(s, "  {name}: {}", serde_json::to_string(&output.value)?)?;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topo_core::TopologyParameters;
    use topogrid_synth::compose_topology;

    #[test]
    fn summary_lists_counts_and_outputs() {
        let params = TopologyParameters {
            enable_progressive_deployment: true,
            ..Default::default()
        };
        let topology = compose_topology(&params).unwrap();
        let text = summary(&topology).unwrap();
        assert!(text.contains("Stack: sample-service-stack"));
        assert!(text.contains("AWS::ElasticLoadBalancingV2::Listener"));
        assert!(text.contains("Delivery: progressive via sample-service-dg"));
        assert!(text.contains("state idle"));
        assert!(text.contains("LoadBalancerDNS"));
        assert!(text.contains("DeployRoleArn"));
    }

    #[test]
    fn synth_writes_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("template.json");
        let flags = ParamFlags {
            config: Some(dir.path().join("missing.toml").display().to_string()),
            ..Default::default()
        };
        // An explicit config path that does not exist is an error.
        assert!(synth(&flags, out.to_str(), OutputFormat::Json, PolicyArg::Linear).is_err());

        let config = dir.path().join("topology.toml");
        std::fs::write(&config, "[service]\nname = \"orders\"\n").unwrap();
        let flags = ParamFlags {
            config: Some(config.display().to_string()),
            ..Default::default()
        };
        synth(&flags, out.to_str(), OutputFormat::Json, PolicyArg::Linear).unwrap();

        let template: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
        assert!(template["Outputs"]["LoadBalancerDNS"].is_object());
    }

    #[test]
    fn validate_reports_invalid_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("topology.toml");
        std::fs::write(&config, "[scaling]\nmin_task_count = 2\n").unwrap();

        let mut flags = ParamFlags {
            config: Some(config.display().to_string()),
            ..Default::default()
        };
        validate(&flags).unwrap();

        flags.max_tasks = Some(1);
        let err = validate(&flags).unwrap_err();
        assert!(err.to_string().contains("max_task_count"));
    }
}

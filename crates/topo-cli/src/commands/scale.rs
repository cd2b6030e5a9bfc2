use topo_core::TopologyParameters;
use topogrid_autoscale::policy::DEFAULT_REQUESTS_PER_INSTANCE;
use topogrid_autoscale::{Autoscaler, ScaleDecision, ScalingPolicySet, ScalingSignals};

use super::params::ParamFlags;

pub fn scale(flags: &ParamFlags, current: u32, cpu: f64, requests: f64) -> anyhow::Result<()> {
    let params = flags.resolve()?;
    params.validate()?;

    let signals = ScalingSignals {
        current_instances: current,
        cpu_utilization_percent: cpu,
        requests_per_instance: requests,
    };
    let policy = policy_for(&params);
    let decision = decide(&params, &signals);

    println!(
        "cpu demands {}, requests demand {} (bounds {}..={})",
        policy.cpu.demand(&signals),
        policy.request_rate.demand(&signals),
        policy.min(),
        policy.max(),
    );
    match decision {
        ScaleDecision::ScaleTo(n) => println!("→ scale {current} → {n}"),
        ScaleDecision::NoChange => println!("→ no change ({current})"),
    }
    Ok(())
}

fn policy_for(params: &TopologyParameters) -> ScalingPolicySet {
    ScalingPolicySet::new(
        params.min_task_count,
        params.max_task_count,
        params.cpu_target_percent,
        DEFAULT_REQUESTS_PER_INSTANCE,
    )
}

/// A fresh autoscaler has no cooldown running.
pub fn decide(params: &TopologyParameters, signals: &ScalingSignals) -> ScaleDecision {
    Autoscaler::new(policy_for(params)).evaluate(0, signals)
}

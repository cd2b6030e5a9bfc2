//! Offline rollout rehearsal.
//!
//! Composes the topology with progressive delivery on, then plays the
//! role of the external controller: poll once per shift interval (or once
//! per bake window), report alarms, and apply whatever the state machine
//! asks for until the rollout finalizes or rolls back.

use std::time::Duration;

use anyhow::Context;
use topogrid_rollout::{AlarmStatus, DeploymentPhase, DeploymentState, RolloutPolicy, ShiftAction};
use topogrid_synth::{ComposeOptions, compose_with};
use tracing::info;

use super::PolicyArg;
use super::params::ParamFlags;

/// Polls before the simulation gives up.
const MAX_POLLS: usize = 1_000;

/// One observed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub at: Duration,
    pub phase: DeploymentPhase,
    pub action: ShiftAction,
}

pub fn simulate(
    flags: &ParamFlags,
    policy: PolicyArg,
    alarm_at_percent: Option<u8>,
    termination_wait: u32,
) -> anyhow::Result<()> {
    let mut params = flags.resolve()?;
    params.enable_progressive_deployment = true;
    info!(service = %params.service_name, ?policy, ?alarm_at_percent, "simulating rollout");

    let options = ComposeOptions {
        rollout: RolloutPolicy {
            shift: policy.shift(),
            termination_wait_minutes: termination_wait,
        },
    };
    let topology = compose_with(&params, &options)?;
    let progressive = topology
        .delivery
        .progressive()
        .context("progressive delivery was not composed")?;

    println!(
        "Deployment group {} ({}), blue {} / green {}",
        progressive.deployment_group_name,
        progressive.deployment_config_name,
        progressive.state.target_groups().blue,
        progressive.state.target_groups().green,
    );

    let steps = run(
        progressive.state.clone(),
        &progressive.alarm_name,
        alarm_at_percent,
    )?;
    for step in &steps {
        println!(
            "  t+{:>4}m  {:<24} {}",
            step.at.as_secs() / 60,
            step.phase.to_string(),
            describe(&step.action)
        );
    }
    if let Some(DeploymentPhase::RolledBack { reason }) = steps.last().map(|s| &s.phase) {
        println!("✗ Rolled back: {reason}");
    } else {
        println!("✓ Finalized");
    }
    Ok(())
}

/// Drive `state` from `begin` to a terminal phase.
pub fn run(
    mut state: DeploymentState,
    alarm_name: &str,
    alarm_at_percent: Option<u8>,
) -> anyhow::Result<Vec<Step>> {
    let mut clock = Duration::ZERO;
    let first = state.begin("simulated-revision")?;
    let mut steps = vec![Step {
        at: clock,
        phase: state.phase().clone(),
        action: first,
    }];

    for _ in 0..MAX_POLLS {
        let wait = match state.phase() {
            DeploymentPhase::ShiftingTraffic { .. } => state.policy().shift.interval(),
            DeploymentPhase::Baking => state.policy().termination_wait(),
            DeploymentPhase::Idle | DeploymentPhase::Finalized | DeploymentPhase::RolledBack { .. } => {
                return Ok(steps);
            }
        };
        clock += wait;

        let alarms = match alarm_at_percent {
            Some(p) if state.split().green >= p => AlarmStatus::Firing {
                alarm: alarm_name.to_string(),
            },
            _ => AlarmStatus::Ok,
        };
        if let Some(action) = state.advance(wait, &alarms) {
            steps.push(Step {
                at: clock,
                phase: state.phase().clone(),
                action,
            });
        }
    }
    anyhow::bail!("rollout did not settle within {MAX_POLLS} polls")
}

fn describe(action: &ShiftAction) -> String {
    match action {
        ShiftAction::Shift(split) => format!("blue {}% / green {}%", split.blue, split.green),
        ShiftAction::Revert => "all traffic back to blue".to_string(),
        ShiftAction::Release { target_group } => format!("release {target_group}"),
    }
}

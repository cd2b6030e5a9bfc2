//! Whole-topology properties.
//!
//! Composes full topologies from parameters and checks the wiring that
//! holds for every valid input, plus the fail-fast path for invalid ones.

use std::time::Duration;

use serde_json::json;
use topo_core::{LogicalId, ParameterError, SynthError, TopologyParameters};
use topogrid_autoscale::ScalingSignals;
use topogrid_rollout::{AlarmStatus, DeploymentPhase, RolloutPolicy, ShiftAction, ShiftPolicy, TrafficSplit};
use topogrid_synth::composer::{OUTPUT_DEPLOY_ROLE, OUTPUT_LOAD_BALANCER};
use topogrid_synth::trust::{OIDC_AUDIENCE, OIDC_ISSUER};
use topogrid_synth::{ComposeOptions, compose_topology, compose_with};

fn params(progressive: bool) -> TopologyParameters {
    TopologyParameters {
        service_name: "checkout".to_string(),
        min_task_count: 1,
        max_task_count: 5,
        cpu_target_percent: 55,
        enable_progressive_deployment: progressive,
        ci_org: "acme".to_string(),
        ci_repo: "checkout-svc".to_string(),
        ..Default::default()
    }
}

#[test]
fn example_progressive_topology() {
    let topo = compose_topology(&params(true)).unwrap();

    assert_eq!(topo.service.desired_count, 1);
    assert_eq!(topo.service.scaling.max(), 5);
    let state = topo.delivery.deployment_state().unwrap();
    assert_eq!(state.phase(), &DeploymentPhase::Idle);

    let prod = topo.graph.get(&topo.service.production_listener).unwrap();
    let canary = topo.graph.get(&topo.service.canary_listener).unwrap();
    assert_eq!(prod.property("/Port"), Some(&json!(80)));
    assert_eq!(canary.property("/Port"), Some(&json!(9001)));
}

#[test]
fn every_topology_has_two_listeners_and_two_target_groups() {
    for progressive in [false, true] {
        for zones in [1, 3, 6] {
            let p = TopologyParameters {
                max_zones: zones,
                ..params(progressive)
            };
            let topo = compose_topology(&p).unwrap();
            let g = &topo.graph;
            assert_eq!(g.count_of_kind("AWS::ElasticLoadBalancingV2::Listener"), 2);
            assert_eq!(g.count_of_kind("AWS::ElasticLoadBalancingV2::TargetGroup"), 2);
            assert_eq!(g.count_of_kind("AWS::EC2::Subnet"), usize::from(zones) * 2);
            assert_eq!(topo.network.zones(), usize::from(zones));
        }
    }
}

#[test]
fn ci_role_subject_embeds_org_and_repo() {
    let topo = compose_topology(&params(false)).unwrap();
    assert_eq!(topo.trust.condition.subject_pattern, "repo:acme/checkout-svc:*");
    assert!(topo.trust.condition.admits(
        OIDC_ISSUER,
        OIDC_AUDIENCE,
        "repo:acme/checkout-svc:ref:refs/heads/main"
    ));
    assert!(!topo.trust.condition.admits(
        OIDC_ISSUER,
        OIDC_AUDIENCE,
        "repo:acme/other:ref:refs/heads/main"
    ));
}

#[test]
fn max_below_min_fails_before_anything_is_built() {
    let p = TopologyParameters {
        min_task_count: 4,
        max_task_count: 2,
        ..params(true)
    };
    let err = compose_topology(&p).unwrap_err();
    assert!(matches!(
        err,
        SynthError::InvalidParameters(ParameterError::MaxBelowMin { min: 4, max: 2 })
    ));
}

#[test]
fn rolling_topology_keeps_idle_canary_pair() {
    let rolling = compose_topology(&params(false)).unwrap();
    let staged = compose_topology(&params(true)).unwrap();

    assert!(rolling.delivery.deployment_state().is_none());
    assert_eq!(rolling.graph.count_of_kind("AWS::CodeDeploy::DeploymentGroup"), 0);

    // The canary pair is declared identically either way.
    for id in [&rolling.service.canary_listener, &rolling.service.canary_target_group] {
        assert_eq!(rolling.graph.get(id), staged.graph.get(id));
    }
    // And production still forwards only to the production group.
    let prod = rolling.graph.get(&rolling.service.production_listener).unwrap();
    assert!(!prod.references().contains(&rolling.service.canary_target_group));
}

#[test]
fn deployment_actions_follow_progressive_flag() {
    let rolling = compose_topology(&params(false)).unwrap();
    let staged = compose_topology(&params(true)).unwrap();
    assert!(!rolling.trust.effective_actions().contains("codedeploy:*"));
    assert!(staged.trust.effective_actions().contains("codedeploy:*"));
}

#[test]
fn outputs_resolve() {
    let topo = compose_topology(&params(true)).unwrap();
    let lb = topo.graph.output(OUTPUT_LOAD_BALANCER).unwrap();
    assert_eq!(lb.value, topo.outputs.load_balancer_address);
    assert_eq!(
        lb.value["Fn::GetAtt"][0],
        topo.service.load_balancer.as_str()
    );
    let role = topo.graph.output(OUTPUT_DEPLOY_ROLE).unwrap();
    assert_eq!(role.value["Fn::GetAtt"][0], topo.trust.ci_role.as_str());
}

#[test]
fn synthesis_is_deterministic() {
    let a = compose_topology(&params(true)).unwrap().template();
    let b = compose_topology(&params(true)).unwrap().template();
    assert_eq!(a, b);
}

#[test]
fn template_lists_dependencies_before_dependents() {
    let topo = compose_topology(&params(true)).unwrap();
    let order = topo.graph.topological_order().unwrap();
    assert_eq!(order.len(), topo.graph.len());
    let pos = |id: &LogicalId| order.iter().position(|o| o == id).unwrap();
    assert!(pos(&topo.network.vpc) < pos(&topo.service.load_balancer));
    assert!(pos(&topo.service.service) < pos(&topo.delivery.progressive().unwrap().deployment_group));
}

#[test]
fn predefined_rollout_policy_is_passed_through() {
    let options = ComposeOptions {
        rollout: RolloutPolicy {
            shift: ShiftPolicy::canary_10_percent_5_minutes(),
            termination_wait_minutes: 5,
        },
    };
    let topo = compose_with(&params(true), &options).unwrap();
    let p = topo.delivery.progressive().unwrap();
    assert_eq!(p.deployment_config_name, "CodeDeployDefault.ECSCanary10Percent5Minutes");
    assert!(p.deployment_config.is_none());
}

#[test]
fn synthesized_state_machine_rolls_back_on_alarm() {
    let topo = compose_topology(&params(true)).unwrap();
    let mut state = topo.delivery.deployment_state().unwrap().clone();

    assert_eq!(state.begin("rev-2").unwrap(), ShiftAction::Shift(TrafficSplit::green(10)));
    state.advance(Duration::from_secs(300), &AlarmStatus::Ok);
    assert_eq!(state.split(), TrafficSplit { blue: 80, green: 20 });

    let alarm = AlarmStatus::Firing {
        alarm: topo.delivery.progressive().unwrap().alarm_name.clone(),
    };
    assert_eq!(state.advance(Duration::from_secs(10), &alarm), Some(ShiftAction::Revert));
    assert!(matches!(state.phase(), DeploymentPhase::RolledBack { .. }));
    assert_eq!(state.split(), TrafficSplit::all_blue());
}

#[test]
fn synthesized_scaling_takes_the_larger_demand() {
    let topo = compose_topology(&params(false)).unwrap();
    let signals = ScalingSignals {
        current_instances: 2,
        cpu_utilization_percent: 55.0,
        requests_per_instance: 2500.0,
    };
    // CPU wants 2, requests want 5.
    assert_eq!(topo.service.scaling.desired_count(&signals), 5);
}

#[test]
fn sidecar_flag_adds_collector() {
    let p = TopologyParameters {
        enable_tracing_sidecar: true,
        ..params(false)
    };
    let topo = compose_topology(&p).unwrap();
    assert_eq!(topo.observability.sidecar.as_deref(), Some("adot-collector"));
    let task = topo.graph.get(&topo.service.task_definition).unwrap();
    assert_eq!(
        task.property("/ContainerDefinitions/1/Essential"),
        Some(&json!(false))
    );
}

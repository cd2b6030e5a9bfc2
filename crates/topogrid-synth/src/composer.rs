//! TopologyComposer: wires every component in dependency order.

use serde_json::Value;
use tracing::info;

use topo_core::{ResourceGraph, SynthResult, TopologyParameters};
use topogrid_rollout::{DeploymentState, RolloutPolicy};

use crate::network::{NetworkGraph, NetworkProps, build_network};
use crate::observability::{ObservabilityFlags, ObservabilityGraph, attach_observability};
use crate::progressive::{ProgressiveDeployment, enable_progressive};
use crate::service::{ServiceGraph, build_service, verify_canary_isolation};
use crate::trust::{SubGraph, TrustBoundary, build_trust_boundary};

pub const OUTPUT_LOAD_BALANCER: &str = "LoadBalancerDNS";
pub const OUTPUT_DEPLOY_ROLE: &str = "DeployRoleArn";

/// How new revisions reach production.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The orchestrator replaces tasks in place.
    Rolling,
    /// Traffic is shifted between blue and green target groups.
    Progressive(ProgressiveDeployment),
}

impl Delivery {
    pub fn progressive(&self) -> Option<&ProgressiveDeployment> {
        match self {
            Delivery::Rolling => None,
            Delivery::Progressive(p) => Some(p),
        }
    }

    pub fn deployment_state(&self) -> Option<&DeploymentState> {
        self.progressive().map(|p| &p.state)
    }

    pub fn is_progressive(&self) -> bool {
        matches!(self, Delivery::Progressive(_))
    }
}

/// Externally consumable values.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyOutputs {
    pub load_balancer_address: Value,
    pub deploy_role_arn: Value,
}

/// Knobs that are not topology parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    pub rollout: RolloutPolicy,
}

/// A fully wired, validated topology.
#[derive(Debug, Clone)]
pub struct Topology {
    pub stack_name: String,
    pub graph: ResourceGraph,
    pub network: NetworkGraph,
    pub service: ServiceGraph,
    pub observability: ObservabilityGraph,
    pub delivery: Delivery,
    pub trust: TrustBoundary,
    pub outputs: TopologyOutputs,
}

impl Topology {
    /// The CloudFormation-style template document.
    pub fn template(&self) -> Value {
        self.graph.to_template(&format!(
            "{} service topology ({})",
            self.service.service_name,
            if self.delivery.is_progressive() {
                "progressive delivery"
            } else {
                "rolling delivery"
            }
        ))
    }
}

pub fn compose_topology(params: &TopologyParameters) -> SynthResult<Topology> {
    compose_with(params, &ComposeOptions::default())
}

pub fn compose_with(params: &TopologyParameters, options: &ComposeOptions) -> SynthResult<Topology> {
    // Nothing is declared for invalid input.
    params.validate()?;

    let mut graph = ResourceGraph::new();

    let network = build_network(
        &mut graph,
        &NetworkProps::new(&params.service_name, params.max_zones),
    )?;
    let service = build_service(&mut graph, &network, params)?;
    let observability = attach_observability(
        &mut graph,
        &service,
        &ObservabilityFlags {
            tracing_sidecar: params.enable_tracing_sidecar,
        },
    )?;

    let delivery = if params.enable_progressive_deployment {
        Delivery::Progressive(enable_progressive(&mut graph, &service, &options.rollout)?)
    } else {
        Delivery::Rolling
    };

    let mut sub_graphs = vec![SubGraph::Network, SubGraph::Compute, SubGraph::Observability];
    if delivery.is_progressive() {
        sub_graphs.push(SubGraph::Progressive);
    }
    let trust = build_trust_boundary(&mut graph, params, &sub_graphs)?;

    let outputs = TopologyOutputs {
        load_balancer_address: service.load_balancer_address.clone(),
        deploy_role_arn: trust.ci_role_arn.clone(),
    };
    graph.add_output(
        OUTPUT_LOAD_BALANCER,
        "Public address of the load balancer",
        outputs.load_balancer_address.clone(),
    )?;
    graph.add_output(
        OUTPUT_DEPLOY_ROLE,
        "Role assumed by CI to deploy",
        outputs.deploy_role_arn.clone(),
    )?;

    graph.validate()?;
    verify_canary_isolation(&graph, &service)?;
    trust.verify()?;

    info!(
        stack = %params.stack_name(),
        resources = graph.len(),
        progressive = delivery.is_progressive(),
        "topology composed"
    );

    Ok(Topology {
        stack_name: params.stack_name(),
        graph,
        network,
        service,
        observability,
        delivery,
        trust,
        outputs,
    })
}

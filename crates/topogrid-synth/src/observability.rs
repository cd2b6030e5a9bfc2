//! Observability: dashboard and optional collector sidecar.

use serde_json::{Value, json};
use tracing::{debug, info};

use topo_core::graph::sub;
use topo_core::{LogicalId, Resource, ResourceGraph, SynthError, SynthResult};

use crate::iam::{PolicyStatement, inline_policy};
use crate::service::{ServiceGraph, awslogs};

const SCOPE: &str = "Observability";

/// Widget period; fine enough to resolve individual shift intervals.
pub const METRIC_PERIOD_SECS: u32 = 60;

pub const COLLECTOR_CONTAINER: &str = "adot-collector";
pub const COLLECTOR_IMAGE: &str = "amazon/aws-otel-collector:latest";
pub const COLLECTOR_CONFIG: &str = "/etc/aws-otel-config.yaml";
pub const COLLECTOR_PORT: u16 = 4317;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservabilityFlags {
    pub tracing_sidecar: bool,
}

#[derive(Debug, Clone)]
pub struct ObservabilityGraph {
    pub dashboard: LogicalId,
    pub dashboard_name: String,
    /// Metric names charted, in widget order.
    pub widgets: Vec<&'static str>,
    /// Container name of the collector, when attached.
    pub sidecar: Option<String>,
}

pub fn attach_observability(
    graph: &mut ResourceGraph,
    service: &ServiceGraph,
    flags: &ObservabilityFlags,
) -> SynthResult<ObservabilityGraph> {
    let name = service.service_name.as_str();
    let dashboard_name = format!("{name}-dashboard");

    let body = json!({
        "widgets": [
            metric_widget(
                "CPU utilization",
                0,
                json!([
                    "AWS/ECS", "CPUUtilization",
                    "ClusterName", format!("{name}-cluster"),
                    "ServiceName", name,
                ]),
            ),
            metric_widget(
                "Request count",
                12,
                json!([
                    "AWS/ApplicationELB", "RequestCount",
                    "TargetGroup", format!("${{{}.TargetGroupFullName}}", service.production_target_group),
                    "LoadBalancer", format!("${{{}.LoadBalancerFullName}}", service.load_balancer),
                ]),
            ),
        ],
    });
    let body = serde_json::to_string(&body).map_err(|e| SynthError::InvalidProperty {
        resource: dashboard_name.clone(),
        reason: e.to_string(),
    })?;

    // The body is a Fn::Sub template, so the `${Id.Attr}` placeholders above
    // become real dependencies of the dashboard.
    let dashboard = graph.add(
        LogicalId::new(SCOPE, "Dashboard"),
        Resource::new(
            "AWS::CloudWatch::Dashboard",
            json!({
                "DashboardName": dashboard_name,
                "DashboardBody": sub(body),
            }),
        ),
    )?;

    let sidecar = if flags.tracing_sidecar {
        attach_collector(graph, service)?;
        Some(COLLECTOR_CONTAINER.to_string())
    } else {
        None
    };

    info!(
        service = %name,
        dashboard = %dashboard_name,
        sidecar = sidecar.is_some(),
        "observability attached"
    );

    Ok(ObservabilityGraph {
        dashboard,
        dashboard_name,
        widgets: vec!["CPUUtilization", "RequestCount"],
        sidecar,
    })
}

fn metric_widget(title: &str, x: u32, metric: Value) -> Value {
    json!({
        "type": "metric",
        "x": x,
        "y": 0,
        "width": 12,
        "height": 6,
        "properties": {
            "title": title,
            "metrics": [metric],
            "period": METRIC_PERIOD_SECS,
            "stat": "Average",
            "region": "${AWS::Region}",
        },
    })
}

/// Appends the collector container to the task definition and grants the
/// task role what the collector exports with.
fn attach_collector(graph: &mut ResourceGraph, service: &ServiceGraph) -> SynthResult<()> {
    let container = json!({
        "Name": COLLECTOR_CONTAINER,
        "Image": COLLECTOR_IMAGE,
        // A collector crash must not take the workload down with it.
        "Essential": false,
        "Command": ["--config", COLLECTOR_CONFIG],
        "PortMappings": [{ "ContainerPort": COLLECTOR_PORT, "Protocol": "tcp" }],
        "LogConfiguration": awslogs(&service.log_group, "adot"),
    });

    let task = graph.get_mut(&service.task_definition)?;
    let containers = task
        .properties
        .get_mut("ContainerDefinitions")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| SynthError::InvalidProperty {
            resource: service.task_definition.to_string(),
            reason: "task definition has no container list".to_string(),
        })?;
    containers.push(container);

    let role = graph.get_mut(&service.task_role)?;
    let policies = role
        .properties
        .get_mut("Policies")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| SynthError::InvalidProperty {
            resource: service.task_role.to_string(),
            reason: "task role has no inline policy list".to_string(),
        })?;
    // Trace and metric export APIs accept no resource scoping.
    policies.push(inline_policy(
        "telemetry-export",
        &[PolicyStatement::allow(
            &[
                "xray:PutTraceSegments",
                "xray:PutTelemetryRecords",
                "cloudwatch:PutMetricData",
            ],
            vec![json!("*")],
        )],
    ));

    debug!(task_definition = %service.task_definition, "collector sidecar appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkProps, build_network};
    use crate::service::build_service;
    use topo_core::TopologyParameters;

    fn service() -> (ResourceGraph, ServiceGraph) {
        let params = TopologyParameters::default();
        let mut graph = ResourceGraph::new();
        let net = build_network(&mut graph, &NetworkProps::new(&params.service_name, 2)).unwrap();
        let svc = build_service(&mut graph, &net, &params).unwrap();
        (graph, svc)
    }

    #[test]
    fn dashboard_tracks_cpu_and_requests_per_minute() {
        let (mut graph, svc) = service();
        let obs = attach_observability(&mut graph, &svc, &ObservabilityFlags::default()).unwrap();
        assert_eq!(obs.dashboard_name, "sample-service-dashboard");
        assert_eq!(obs.widgets, ["CPUUtilization", "RequestCount"]);
        assert!(obs.sidecar.is_none());

        let dashboard = graph.get(&obs.dashboard).unwrap();
        let body = dashboard.property("/DashboardBody/Fn::Sub").unwrap().as_str().unwrap();
        let parsed: Value = serde_json::from_str(body).unwrap();
        for widget in parsed["widgets"].as_array().unwrap() {
            assert_eq!(widget["properties"]["period"], 60);
        }
        // Placeholders resolve to the load balancer and target group.
        let refs = dashboard.references();
        assert!(refs.contains(&svc.load_balancer));
        assert!(refs.contains(&svc.production_target_group));
        graph.validate().unwrap();
    }

    #[test]
    fn sidecar_is_non_essential() {
        let (mut graph, svc) = service();
        let flags = ObservabilityFlags {
            tracing_sidecar: true,
        };
        let obs = attach_observability(&mut graph, &svc, &flags).unwrap();
        assert_eq!(obs.sidecar.as_deref(), Some("adot-collector"));

        let task = graph.get(&svc.task_definition).unwrap();
        let sidecar = task.property("/ContainerDefinitions/1").unwrap();
        assert_eq!(sidecar["Essential"], false);
        assert_eq!(sidecar["PortMappings"][0]["ContainerPort"], 4317);
        assert_eq!(task.property("/ContainerDefinitions/0/Essential"), Some(&json!(true)));

        let role = graph.get(&svc.task_role).unwrap();
        assert_eq!(
            role.property("/Policies/1/PolicyName"),
            Some(&json!("telemetry-export"))
        );
    }

    #[test]
    fn without_sidecar_task_has_one_container() {
        let (mut graph, svc) = service();
        attach_observability(&mut graph, &svc, &ObservabilityFlags::default()).unwrap();
        let task = graph.get(&svc.task_definition).unwrap();
        assert_eq!(
            task.property("/ContainerDefinitions").unwrap().as_array().unwrap().len(),
            1
        );
    }
}

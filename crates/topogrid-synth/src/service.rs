//! ComputeService: a scaled Fargate service behind a public load balancer.
//!
//! Besides the production listener/target-group pair, a canary pair is
//! always declared on its own port and attached to the same service.
//! It is closed to public ingress and receives no production traffic
//! until a staged deployment shifts some to it, so progressive delivery
//! can be switched on later without touching the network.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::info;

use topo_core::graph::{arn, get_att, join, reference, sub};
use topo_core::{LogicalId, Resource, ResourceGraph, SynthError, SynthResult, TopologyParameters};
use topogrid_autoscale::policy::DEFAULT_REQUESTS_PER_INSTANCE;
use topogrid_autoscale::{Cooldowns, ScalingPolicySet};

use crate::iam::{PolicyStatement, inline_policy, managed_policy_arn, service_trust_policy};
use crate::network::NetworkGraph;

const SCOPE: &str = "Service";

pub const CONTAINER_NAME: &str = "app";
pub const CONTAINER_PORT: u16 = 8000;
pub const PRODUCTION_PORT: u16 = 80;
pub const CANARY_PORT: u16 = 9001;
pub const HEALTH_CHECK_PATH: &str = "/healthz";
/// Tolerates cold starts before failed probes get a task replaced.
pub const HEALTH_CHECK_GRACE: Duration = Duration::from_secs(60);
/// Fixed sizing: the workload is I/O-bound.
pub const TASK_CPU: u32 = 512;
pub const TASK_MEMORY_MIB: u32 = 1024;
pub const LOG_RETENTION_DAYS: u32 = 30;

/// Who replaces tasks on a new revision. Fixed for the service's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeploymentController {
    /// The orchestrator's own rolling replacement.
    Ecs,
    /// An external staged-deployment controller.
    CodeDeploy,
}

impl DeploymentController {
    pub fn for_params(params: &TopologyParameters) -> Self {
        if params.enable_progressive_deployment {
            Self::CodeDeploy
        } else {
            Self::Ecs
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecs => "ECS",
            Self::CodeDeploy => "CODE_DEPLOY",
        }
    }
}

/// Typed outputs of the compute service.
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    pub service_name: String,
    pub cluster: LogicalId,
    pub service: LogicalId,
    pub task_definition: LogicalId,
    pub task_role: LogicalId,
    pub execution_role: LogicalId,
    pub log_group: LogicalId,
    pub secret: LogicalId,
    pub config_parameter: LogicalId,
    pub load_balancer: LogicalId,
    pub load_balancer_address: Value,
    pub load_balancer_security_group: LogicalId,
    pub service_security_group: LogicalId,
    pub production_listener: LogicalId,
    pub canary_listener: LogicalId,
    pub production_target_group: LogicalId,
    pub canary_target_group: LogicalId,
    pub production_target_group_name: String,
    pub canary_target_group_name: String,
    pub scalable_target: LogicalId,
    pub cpu_scaling_policy: LogicalId,
    pub request_scaling_policy: LogicalId,
    pub scaling: ScalingPolicySet,
    pub cooldowns: Cooldowns,
    pub controller: DeploymentController,
    pub desired_count: u32,
}

pub fn build_service(
    graph: &mut ResourceGraph,
    network: &NetworkGraph,
    params: &TopologyParameters,
) -> SynthResult<ServiceGraph> {
    let name = params.service_name.as_str();
    let controller = DeploymentController::for_params(params);

    // ── Log sink, secret and config bindings ───────────────────

    let log_group = graph.add(
        LogicalId::new(SCOPE, "LogGroup"),
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": format!("/aws/ecs/{name}"),
                "RetentionInDays": LOG_RETENTION_DAYS,
            }),
        ),
    )?;

    // Only the binding is declared; the value is managed out of band.
    let secret = graph.add(
        LogicalId::new(SCOPE, "AppSecret"),
        Resource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Name": format!("/{name}/app"),
                "Description": "Secret injected into the service's tasks.",
            }),
        ),
    )?;

    let config_parameter = graph.add(
        LogicalId::new(SCOPE, "ConfigParameter"),
        Resource::new(
            "AWS::SSM::Parameter",
            json!({
                "Name": format!("/{name}/example-config"),
                "Type": "String",
                "Value": "example",
            }),
        ),
    )?;

    // ── Identities ─────────────────────────────────────────────

    let execution_role = graph.add(
        LogicalId::new(SCOPE, "TaskExecutionRole"),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": format!("{name}-task-execution"),
                "AssumeRolePolicyDocument": service_trust_policy("ecs-tasks.amazonaws.com"),
                "ManagedPolicyArns": [
                    managed_policy_arn("service-role/AmazonECSTaskExecutionRolePolicy"),
                ],
                "Policies": [inline_policy(
                    "secret-injection",
                    &[PolicyStatement::allow(
                        &["secretsmanager:GetSecretValue"],
                        vec![reference(&secret)],
                    )],
                )],
            }),
        ),
    )?;

    let task_role = graph.add(
        LogicalId::new(SCOPE, "TaskRole"),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": format!("{name}-task"),
                "AssumeRolePolicyDocument": service_trust_policy("ecs-tasks.amazonaws.com"),
                "Policies": [inline_policy(
                    "config-read",
                    &[
                        PolicyStatement::allow(
                            &["ssm:GetParameter", "ssm:GetParameters"],
                            vec![arn("ssm", &format!("parameter/{name}/example-config"))],
                        ),
                        PolicyStatement::allow(
                            &["secretsmanager:GetSecretValue"],
                            vec![reference(&secret)],
                        ),
                    ],
                )],
            }),
        ),
    )?;

    // ── Task definition ────────────────────────────────────────

    let task_definition = graph.add(
        LogicalId::new(SCOPE, "TaskDefinition"),
        Resource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": name,
                "Cpu": TASK_CPU.to_string(),
                "Memory": TASK_MEMORY_MIB.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "ExecutionRoleArn": get_att(&execution_role, "Arn"),
                "TaskRoleArn": get_att(&task_role, "Arn"),
                "ContainerDefinitions": [{
                    "Name": CONTAINER_NAME,
                    "Image": sub(format!(
                        "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{name}:latest"
                    )),
                    "Essential": true,
                    "PortMappings": [{ "ContainerPort": CONTAINER_PORT, "Protocol": "tcp" }],
                    "Environment": [{ "Name": "SERVICE_NAME", "Value": name }],
                    "Secrets": [{ "Name": "APP_SECRET", "ValueFrom": reference(&secret) }],
                    "LogConfiguration": awslogs(&log_group, "app"),
                }],
            }),
        ),
    )?;

    // ── Load balancer ──────────────────────────────────────────

    let load_balancer_security_group = graph.add(
        LogicalId::new(SCOPE, "LoadBalancerSecurityGroup"),
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{name} load balancer"),
                "VpcId": reference(&network.vpc),
                // Production port only; the canary port stays closed.
                "SecurityGroupIngress": [{
                    "IpProtocol": "tcp",
                    "FromPort": PRODUCTION_PORT,
                    "ToPort": PRODUCTION_PORT,
                    "CidrIp": "0.0.0.0/0",
                }],
            }),
        ),
    )?;

    let service_security_group = graph.add(
        LogicalId::new(SCOPE, "ServiceSecurityGroup"),
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{name} tasks"),
                "VpcId": reference(&network.vpc),
                "SecurityGroupIngress": [{
                    "IpProtocol": "tcp",
                    "FromPort": CONTAINER_PORT,
                    "ToPort": CONTAINER_PORT,
                    "SourceSecurityGroupId": get_att(&load_balancer_security_group, "GroupId"),
                }],
            }),
        ),
    )?;

    let mut lb = Resource::new(
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "Name": format!("{name}-alb"),
            "Type": "application",
            "Scheme": "internet-facing",
            "Subnets": network.public_subnets.iter().map(reference).collect::<Vec<_>>(),
            "SecurityGroups": [get_att(&load_balancer_security_group, "GroupId")],
        }),
    );
    for route in &network.internet_routes {
        lb = lb.depends_on(route);
    }
    let load_balancer = graph.add(LogicalId::new(SCOPE, "LoadBalancer"), lb)?;

    let production_target_group_name = format!("{name}-tg");
    let canary_target_group_name = format!("{name}-canary");

    let production_target_group = graph.add(
        LogicalId::new(SCOPE, "ProductionTargetGroup"),
        target_group(&production_target_group_name, network),
    )?;
    let production_listener = graph.add(
        LogicalId::new(SCOPE, "ProductionListener"),
        listener(&load_balancer, PRODUCTION_PORT, &production_target_group),
    )?;

    let canary_target_group = graph.add(
        LogicalId::new(SCOPE, "CanaryTargetGroup"),
        target_group(&canary_target_group_name, network),
    )?;
    let canary_listener = graph.add(
        LogicalId::new(SCOPE, "CanaryListener"),
        listener(&load_balancer, CANARY_PORT, &canary_target_group),
    )?;

    // ── Service ────────────────────────────────────────────────

    let cluster = graph.add(
        LogicalId::new(SCOPE, "Cluster"),
        Resource::new(
            "AWS::ECS::Cluster",
            json!({ "ClusterName": format!("{name}-cluster") }),
        ),
    )?;

    let mut service_props = json!({
        "ServiceName": name,
        "Cluster": reference(&cluster),
        "TaskDefinition": reference(&task_definition),
        "LaunchType": "FARGATE",
        "DesiredCount": params.min_task_count,
        "HealthCheckGracePeriodSeconds": HEALTH_CHECK_GRACE.as_secs(),
        "DeploymentController": { "Type": controller.as_str() },
        "NetworkConfiguration": {
            "AwsvpcConfiguration": {
                "AssignPublicIp": "DISABLED",
                "Subnets": network.private_subnets.iter().map(reference).collect::<Vec<_>>(),
                "SecurityGroups": [get_att(&service_security_group, "GroupId")],
            },
        },
        "LoadBalancers": [
            {
                "ContainerName": CONTAINER_NAME,
                "ContainerPort": CONTAINER_PORT,
                "TargetGroupArn": reference(&production_target_group),
            },
            {
                "ContainerName": CONTAINER_NAME,
                "ContainerPort": CONTAINER_PORT,
                "TargetGroupArn": reference(&canary_target_group),
            },
        ],
    });
    if controller == DeploymentController::Ecs {
        service_props["DeploymentConfiguration"] = json!({
            "MaximumPercent": 200,
            "MinimumHealthyPercent": 50,
        });
    }
    let service = graph.add(
        LogicalId::new(SCOPE, "Service"),
        Resource::new("AWS::ECS::Service", service_props)
            .depends_on(&production_listener)
            .depends_on(&canary_listener),
    )?;

    // ── Scaling ────────────────────────────────────────────────

    let scaling = ScalingPolicySet::new(
        params.min_task_count,
        params.max_task_count,
        params.cpu_target_percent,
        DEFAULT_REQUESTS_PER_INSTANCE,
    );
    let cooldowns = Cooldowns::default();

    let scalable_target = graph.add(
        LogicalId::new(SCOPE, "ScalableTarget"),
        Resource::new(
            "AWS::ApplicationAutoScaling::ScalableTarget",
            json!({
                "MinCapacity": scaling.min(),
                "MaxCapacity": scaling.max(),
                "ServiceNamespace": "ecs",
                "ScalableDimension": "ecs:service:DesiredCount",
                "ResourceId": join("/", vec![
                    json!("service"),
                    reference(&cluster),
                    get_att(&service, "Name"),
                ]),
                "RoleARN": sub(
                    "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService",
                ),
            }),
        ),
    )?;

    let cpu_scaling_policy = graph.add(
        LogicalId::new(SCOPE, "CpuScaling"),
        Resource::new(
            "AWS::ApplicationAutoScaling::ScalingPolicy",
            json!({
                "PolicyName": format!("{name}-cpu"),
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": reference(&scalable_target),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": {
                        "PredefinedMetricType": "ECSServiceAverageCPUUtilization",
                    },
                    "TargetValue": scaling.cpu.target_percent,
                    "ScaleOutCooldown": cooldowns.scale_out.as_secs(),
                    "ScaleInCooldown": cooldowns.scale_in.as_secs(),
                },
            }),
        ),
    )?;

    let request_scaling_policy = graph.add(
        LogicalId::new(SCOPE, "RequestScaling"),
        Resource::new(
            "AWS::ApplicationAutoScaling::ScalingPolicy",
            json!({
                "PolicyName": format!("{name}-requests"),
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": reference(&scalable_target),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": {
                        "PredefinedMetricType": "ALBRequestCountPerTarget",
                        "ResourceLabel": join("/", vec![
                            get_att(&load_balancer, "LoadBalancerFullName"),
                            get_att(&production_target_group, "TargetGroupFullName"),
                        ]),
                    },
                    "TargetValue": scaling.request_rate.requests_per_instance,
                    "ScaleOutCooldown": cooldowns.scale_out.as_secs(),
                    "ScaleInCooldown": cooldowns.scale_in.as_secs(),
                },
            }),
        ),
    )?;

    let out = ServiceGraph {
        service_name: name.to_string(),
        cluster,
        service,
        task_definition,
        task_role,
        execution_role,
        log_group,
        secret,
        config_parameter,
        load_balancer_address: get_att(&load_balancer, "DNSName"),
        load_balancer,
        load_balancer_security_group,
        service_security_group,
        production_listener,
        canary_listener,
        production_target_group,
        canary_target_group,
        production_target_group_name,
        canary_target_group_name,
        scalable_target,
        cpu_scaling_policy,
        request_scaling_policy,
        scaling,
        cooldowns,
        controller,
        desired_count: params.min_task_count,
    };

    verify_canary_isolation(graph, &out)?;

    info!(
        service = %name,
        controller = controller.as_str(),
        desired = out.desired_count,
        min = scaling.min(),
        max = scaling.max(),
        "compute service declared"
    );

    Ok(out)
}

/// The canary pair must never carry production traffic by declaration:
/// the production listener forwards only to the production target group
/// at full weight, and nothing opens the canary port to the internet.
pub fn verify_canary_isolation(graph: &ResourceGraph, service: &ServiceGraph) -> SynthResult<()> {
    let production = graph
        .get(&service.production_listener)
        .ok_or_else(|| SynthError::ResourceNotFound(service.production_listener.to_string()))?;
    let expected = json!([{
        "TargetGroupArn": reference(&service.production_target_group),
        "Weight": 100,
    }]);
    if production.property("/DefaultActions/0/ForwardConfig/TargetGroups") != Some(&expected) {
        return Err(SynthError::CanaryExposed(
            "production listener must forward only to the production target group".to_string(),
        ));
    }
    if production.references().contains(&service.canary_target_group) {
        return Err(SynthError::CanaryExposed(
            "production listener references the canary target group".to_string(),
        ));
    }

    let sg_id = &service.load_balancer_security_group;
    let sg = graph
        .get(sg_id)
        .ok_or_else(|| SynthError::ResourceNotFound(sg_id.to_string()))?;
    let inline = sg
        .property("/SecurityGroupIngress")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    let group_refs = [reference(sg_id), get_att(sg_id, "GroupId")];
    let standalone = graph
        .of_kind("AWS::EC2::SecurityGroupIngress")
        .filter(|(_, rule)| rule.property("/GroupId").is_some_and(|g| group_refs.contains(g)))
        .map(|(_, rule)| &rule.properties);

    if inline.chain(standalone).any(|rule| opens_port(rule, CANARY_PORT)) {
        return Err(SynthError::CanaryExposed(format!(
            "port {CANARY_PORT} is open to public ingress"
        )));
    }
    Ok(())
}

/// Whether an ingress rule admits traffic on `port`. All-protocol rules
/// and rules without a port range admit every port.
fn opens_port(rule: &Value, port: u16) -> bool {
    let all_protocols = match &rule["IpProtocol"] {
        Value::String(p) => p == "-1",
        Value::Number(n) => n.as_i64() == Some(-1),
        _ => false,
    };
    let (Some(from), Some(to)) = (rule["FromPort"].as_i64(), rule["ToPort"].as_i64()) else {
        return true;
    };
    // -1 is the provider's "every port" marker for ICMP-style rules.
    all_protocols || from == -1 || (from..=to).contains(&i64::from(port))
}

fn target_group(name: &str, network: &NetworkGraph) -> Resource {
    Resource::new(
        "AWS::ElasticLoadBalancingV2::TargetGroup",
        json!({
            "Name": name,
            "Port": CONTAINER_PORT,
            "Protocol": "HTTP",
            "TargetType": "ip",
            "VpcId": reference(&network.vpc),
            "HealthCheckPath": HEALTH_CHECK_PATH,
            "HealthCheckIntervalSeconds": 30,
            "HealthyThresholdCount": 2,
            "UnhealthyThresholdCount": 3,
            "Matcher": { "HttpCode": "200" },
        }),
    )
}

fn listener(load_balancer: &LogicalId, port: u16, target_group: &LogicalId) -> Resource {
    Resource::new(
        "AWS::ElasticLoadBalancingV2::Listener",
        json!({
            "LoadBalancerArn": reference(load_balancer),
            "Port": port,
            "Protocol": "HTTP",
            "DefaultActions": [{
                "Type": "forward",
                "ForwardConfig": {
                    "TargetGroups": [{
                        "TargetGroupArn": reference(target_group),
                        "Weight": 100,
                    }],
                },
            }],
        }),
    )
}

/// `awslogs` driver configuration writing to `log_group`.
pub(crate) fn awslogs(log_group: &LogicalId, stream_prefix: &str) -> Value {
    json!({
        "LogDriver": "awslogs",
        "Options": {
            "awslogs-group": reference(log_group),
            "awslogs-region": { "Ref": "AWS::Region" },
            "awslogs-stream-prefix": stream_prefix,
        },
    })
}

//! ProgressiveDeployment: staged blue/green rollout wiring.
//!
//! Binds the service's production and canary target groups to a deployment
//! group that shifts traffic per a `RolloutPolicy` and rolls back when the
//! canary error alarm fires.

use serde_json::json;
use tracing::info;

use topo_core::graph::{get_att, reference};
use topo_core::{LogicalId, Resource, ResourceGraph, SynthError, SynthResult};
use topogrid_rollout::{DeploymentState, RolloutPolicy, ShiftPolicy, TargetGroupPair};

use crate::iam::{managed_policy_arn, service_trust_policy};
use crate::service::{DeploymentController, ServiceGraph};

const SCOPE: &str = "Progressive";

/// 5xx responses from the canary target group that trip rollback.
pub const CANARY_ERROR_THRESHOLD: u32 = 5;
/// Evaluation window for the canary error alarm.
pub const CANARY_ALARM_PERIOD_SECS: u32 = 60;

#[derive(Debug, Clone)]
pub struct ProgressiveDeployment {
    pub application: LogicalId,
    pub application_name: String,
    pub deployment_group: LogicalId,
    pub deployment_group_name: String,
    pub role: LogicalId,
    pub canary_alarm: LogicalId,
    pub alarm_name: String,
    /// Custom config; `None` when the policy matches a predefined one.
    pub deployment_config: Option<LogicalId>,
    pub deployment_config_name: String,
    /// Starts in `Idle`; the first revision arrives with the next deploy.
    pub state: DeploymentState,
}

pub fn enable_progressive(
    graph: &mut ResourceGraph,
    service: &ServiceGraph,
    policy: &RolloutPolicy,
) -> SynthResult<ProgressiveDeployment> {
    if service.controller != DeploymentController::CodeDeploy {
        return Err(SynthError::InvalidProperty {
            resource: service.service.to_string(),
            reason: "staged rollout needs the service's external deployment controller".to_string(),
        });
    }
    policy.validate().map_err(|e| SynthError::InvalidProperty {
        resource: format!("{SCOPE}/DeploymentGroup"),
        reason: e.to_string(),
    })?;

    let name = service.service_name.as_str();
    let application_name = format!("{name}-app");
    let deployment_group_name = format!("{name}-dg");
    let alarm_name = format!("{name}-canary-5xx");

    let application = graph.add(
        LogicalId::new(SCOPE, "Application"),
        Resource::new(
            "AWS::CodeDeploy::Application",
            json!({
                "ApplicationName": application_name,
                "ComputePlatform": "ECS",
            }),
        ),
    )?;

    let role = graph.add(
        LogicalId::new(SCOPE, "DeployRole"),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": format!("{name}-codedeploy"),
                "AssumeRolePolicyDocument": service_trust_policy("codedeploy.amazonaws.com"),
                "ManagedPolicyArns": [managed_policy_arn("AWSCodeDeployRoleForECS")],
            }),
        ),
    )?;

    let canary_alarm = graph.add(
        LogicalId::new(SCOPE, "CanaryErrorAlarm"),
        Resource::new(
            "AWS::CloudWatch::Alarm",
            json!({
                "AlarmName": alarm_name,
                "AlarmDescription": "5xx responses from the canary target group",
                "Namespace": "AWS/ApplicationELB",
                "MetricName": "HTTPCode_Target_5XX_Count",
                "Dimensions": [
                    {
                        "Name": "LoadBalancer",
                        "Value": get_att(&service.load_balancer, "LoadBalancerFullName"),
                    },
                    {
                        "Name": "TargetGroup",
                        "Value": get_att(&service.canary_target_group, "TargetGroupFullName"),
                    },
                ],
                "Statistic": "Sum",
                "Period": CANARY_ALARM_PERIOD_SECS,
                "EvaluationPeriods": 1,
                "Threshold": CANARY_ERROR_THRESHOLD,
                "ComparisonOperator": "GreaterThanOrEqualToThreshold",
                "TreatMissingData": "notBreaching",
            }),
        ),
    )?;

    let (deployment_config, deployment_config_name) = match policy.shift.predefined_name() {
        Some(predefined) => (None, predefined.to_string()),
        None => {
            let config_name = format!("{name}-{}", policy.shift.slug());
            let id = graph.add(
                LogicalId::new(SCOPE, "DeploymentConfig"),
                Resource::new(
                    "AWS::CodeDeploy::DeploymentConfig",
                    json!({
                        "DeploymentConfigName": config_name,
                        "ComputePlatform": "ECS",
                        "TrafficRoutingConfig": traffic_routing(&policy.shift),
                    }),
                ),
            )?;
            (Some(id), config_name)
        }
    };

    let config_ref = match &deployment_config {
        Some(id) => reference(id),
        None => json!(deployment_config_name),
    };
    let group = Resource::new(
        "AWS::CodeDeploy::DeploymentGroup",
        json!({
            "ApplicationName": reference(&application),
            "DeploymentGroupName": deployment_group_name,
            "ServiceRoleArn": get_att(&role, "Arn"),
            "DeploymentConfigName": config_ref,
            "DeploymentStyle": {
                "DeploymentType": "BLUE_GREEN",
                "DeploymentOption": "WITH_TRAFFIC_CONTROL",
            },
            "BlueGreenDeploymentConfiguration": {
                "DeploymentReadyOption": { "ActionOnTimeout": "CONTINUE_DEPLOYMENT" },
                "TerminateBlueInstancesOnDeploymentSuccess": {
                    "Action": "TERMINATE",
                    "TerminationWaitTimeInMinutes": policy.termination_wait_minutes,
                },
            },
            "AutoRollbackConfiguration": {
                "Enabled": true,
                "Events": ["DEPLOYMENT_FAILURE", "DEPLOYMENT_STOP_ON_ALARM"],
            },
            "AlarmConfiguration": {
                "Enabled": true,
                "Alarms": [{ "Name": reference(&canary_alarm) }],
            },
            "ECSServices": [{
                "ClusterName": reference(&service.cluster),
                "ServiceName": get_att(&service.service, "Name"),
            }],
            "LoadBalancerInfo": {
                "TargetGroupPairInfoList": [{
                    "ProdTrafficRoute": {
                        "ListenerArns": [reference(&service.production_listener)],
                    },
                    "TestTrafficRoute": {
                        "ListenerArns": [reference(&service.canary_listener)],
                    },
                    "TargetGroups": [
                        { "Name": get_att(&service.production_target_group, "TargetGroupName") },
                        { "Name": get_att(&service.canary_target_group, "TargetGroupName") },
                    ],
                }],
            },
        }),
    );
    let deployment_group = graph.add(LogicalId::new(SCOPE, "DeploymentGroup"), group)?;

    let state = DeploymentState::new(
        &deployment_group_name,
        TargetGroupPair {
            blue: service.production_target_group_name.clone(),
            green: service.canary_target_group_name.clone(),
        },
        *policy,
    );

    info!(
        application = %application_name,
        deployment_group = %deployment_group_name,
        config = %deployment_config_name,
        "progressive deployment enabled"
    );

    Ok(ProgressiveDeployment {
        application,
        application_name,
        deployment_group,
        deployment_group_name,
        role,
        canary_alarm,
        alarm_name,
        deployment_config,
        deployment_config_name,
        state,
    })
}

fn traffic_routing(shift: &ShiftPolicy) -> serde_json::Value {
    match *shift {
        ShiftPolicy::Linear {
            step_percent,
            interval_minutes,
        } => json!({
            "Type": "TimeBasedLinear",
            "TimeBasedLinear": {
                "LinearPercentage": step_percent,
                "LinearInterval": interval_minutes,
            },
        }),
        ShiftPolicy::Canary {
            first_percent,
            interval_minutes,
        } => json!({
            "Type": "TimeBasedCanary",
            "TimeBasedCanary": {
                "CanaryPercentage": first_percent,
                "CanaryInterval": interval_minutes,
            },
        }),
        ShiftPolicy::AllAtOnce => json!({ "Type": "AllAtOnce" }),
    }
}

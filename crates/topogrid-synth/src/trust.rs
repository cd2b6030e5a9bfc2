//! TrustBoundary: the CI deployment identity and what it may do.
//!
//! The CI role's effective permissions are the intersection of its own
//! policy and a permission boundary. Both are built from one allow-list
//! keyed by the sub-graphs the topology actually includes, and every
//! resource pattern is scoped to the service's namespace. The only way to
//! assume the role is a federated token from the CI issuer whose subject
//! names the configured repository.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};

use topo_core::graph::{arn, get_att, global_arn, reference};
use topo_core::{LogicalId, Resource, ResourceGraph, SynthError, SynthResult, TopologyParameters};

use crate::iam::{POLICY_VERSION, PolicyStatement, inline_policy, policy_document};

const SCOPE: &str = "Trust";

pub const OIDC_ISSUER: &str = "token.actions.githubusercontent.com";
pub const OIDC_AUDIENCE: &str = "sts.amazonaws.com";

/// Every action any sub-graph may grant.
pub const ALLOWED_ACTIONS: &[&str] = &[
    "cloudformation:*",
    "sts:AssumeRole",
    "iam:PassRole",
    "ec2:Describe*",
    "ec2:CreateTags",
    "ec2:DeleteTags",
    "logs:*",
    "ecs:*",
    "elasticloadbalancing:*",
    "ssm:*",
    "secretsmanager:*",
    "application-autoscaling:*",
    "cloudwatch:GetDashboard",
    "cloudwatch:PutDashboard",
    "cloudwatch:DeleteDashboards",
    "codedeploy:*",
    "cloudwatch:PutMetricAlarm",
    "cloudwatch:DeleteAlarms",
    "cloudwatch:DescribeAlarms",
];

/// Read-only actions the provider only evaluates against `*`.
pub const UNSCOPED_ACTIONS: &[&str] = &["ec2:Describe*", "cloudwatch:DescribeAlarms"];

/// A component whose management actions the CI role needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum SubGraph {
    /// Stack operations and bootstrap role assumption. Always included.
    Base,
    Network,
    Compute,
    Observability,
    Progressive,
}

impl fmt::Display for SubGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubGraph::Base => "base",
            SubGraph::Network => "network",
            SubGraph::Compute => "compute",
            SubGraph::Observability => "observability",
            SubGraph::Progressive => "progressive",
        };
        f.write_str(name)
    }
}

impl SubGraph {
    /// Allow-list entries for this sub-graph, scoped to `service`.
    pub fn statements(&self, service: &str) -> Vec<PolicyStatement> {
        match self {
            SubGraph::Base => vec![
                PolicyStatement::allow(
                    &["cloudformation:*"],
                    vec![arn("cloudformation", &format!("stack/{service}-stack/*"))],
                ),
                PolicyStatement::allow(&["sts:AssumeRole"], vec![global_arn("iam", "role/cdk-*")]),
                PolicyStatement::allow(
                    &["iam:PassRole"],
                    vec![global_arn("iam", &format!("role/{service}-*"))],
                ),
            ],
            SubGraph::Network => vec![
                PolicyStatement::allow(&["ec2:Describe*"], vec![json!("*")]),
                PolicyStatement::allow(&["ec2:CreateTags", "ec2:DeleteTags"], vec![arn("ec2", "*")]),
                PolicyStatement::allow(
                    &["logs:*"],
                    vec![arn("logs", &format!("log-group:/aws/vpc/{service}/*"))],
                ),
            ],
            SubGraph::Compute => vec![
                PolicyStatement::allow(
                    &["ecs:*"],
                    vec![
                        arn("ecs", &format!("cluster/{service}-cluster")),
                        arn("ecs", &format!("service/{service}-cluster/{service}")),
                        arn("ecs", &format!("task-definition/{service}:*")),
                        arn("ecs", &format!("task-set/{service}-cluster/{service}/*")),
                    ],
                ),
                PolicyStatement::allow(
                    &["elasticloadbalancing:*"],
                    vec![
                        arn("elasticloadbalancing", &format!("loadbalancer/app/{service}-alb/*")),
                        arn("elasticloadbalancing", &format!("listener/app/{service}-alb/*")),
                        arn("elasticloadbalancing", &format!("targetgroup/{service}-*/*")),
                    ],
                ),
                PolicyStatement::allow(
                    &["logs:*"],
                    vec![arn("logs", &format!("log-group:/aws/ecs/{service}*"))],
                ),
                PolicyStatement::allow(&["ssm:*"], vec![arn("ssm", &format!("parameter/{service}/*"))]),
                PolicyStatement::allow(
                    &["secretsmanager:*"],
                    vec![arn("secretsmanager", &format!("secret:/{service}/*"))],
                ),
                PolicyStatement::allow(
                    &["application-autoscaling:*"],
                    vec![arn("application-autoscaling", "scalable-target/*")],
                ),
            ],
            SubGraph::Observability => vec![PolicyStatement::allow(
                &[
                    "cloudwatch:GetDashboard",
                    "cloudwatch:PutDashboard",
                    "cloudwatch:DeleteDashboards",
                ],
                vec![global_arn("cloudwatch", &format!("dashboard/{service}-*"))],
            )],
            SubGraph::Progressive => vec![
                PolicyStatement::allow(
                    &["codedeploy:*"],
                    vec![
                        arn("codedeploy", &format!("application:{service}-app")),
                        arn("codedeploy", &format!("deploymentgroup:{service}-app/*")),
                        arn("codedeploy", &format!("deploymentconfig:{service}-*")),
                        arn("codedeploy", "deploymentconfig:CodeDeployDefault.*"),
                    ],
                ),
                PolicyStatement::allow(
                    &["cloudwatch:PutMetricAlarm", "cloudwatch:DeleteAlarms"],
                    vec![arn("cloudwatch", &format!("alarm:{service}-*"))],
                ),
                PolicyStatement::allow(&["cloudwatch:DescribeAlarms"], vec![json!("*")]),
            ],
        }
    }
}

/// Who may assume the CI role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustCondition {
    pub issuer: String,
    pub audience: String,
    /// Glob over the token's `sub` claim.
    pub subject_pattern: String,
}

impl TrustCondition {
    /// Any workflow run in `org/repo`.
    pub fn for_repo(org: &str, repo: &str) -> Self {
        Self {
            issuer: OIDC_ISSUER.to_string(),
            audience: OIDC_AUDIENCE.to_string(),
            subject_pattern: format!("repo:{org}/{repo}:*"),
        }
    }

    /// Whether a token with these claims may assume the role.
    pub fn admits(&self, issuer: &str, audience: &str, subject: &str) -> bool {
        issuer == self.issuer && audience == self.audience && glob_matches(&self.subject_pattern, subject)
    }

    /// The role's assume-role policy document.
    pub fn assume_role_policy(&self) -> Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": {
                    "Federated": global_arn("iam", &format!("oidc-provider/{}", self.issuer)),
                },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": { format!("{}:aud", self.issuer): self.audience },
                    "StringLike": { format!("{}:sub", self.issuer): self.subject_pattern },
                },
            }],
        })
    }
}

/// `StringLike` semantics: `*` is any run of characters, `?` any one.
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct TrustBoundary {
    pub boundary_policy: LogicalId,
    pub boundary_policy_name: String,
    pub ci_role: LogicalId,
    pub ci_role_name: String,
    /// `Fn::GetAtt` of the CI role's ARN.
    pub ci_role_arn: Value,
    pub sub_graphs: Vec<SubGraph>,
    pub boundary_statements: Vec<PolicyStatement>,
    pub role_statements: Vec<PolicyStatement>,
    pub condition: TrustCondition,
}

impl TrustBoundary {
    /// Actions the role grants on at least one resource the boundary also
    /// covers for that action. Boundary wildcards cover concrete actions
    /// and narrower ARN patterns.
    pub fn effective_actions(&self) -> BTreeSet<String> {
        let mut effective = BTreeSet::new();
        for granted in &self.role_statements {
            for action in &granted.actions {
                let allowed = granted.resources.iter().any(|resource| {
                    self.boundary_statements
                        .iter()
                        .any(|bound| bound.covers(action, resource))
                });
                if allowed {
                    effective.insert(action.clone());
                }
            }
        }
        effective
    }

    /// No statement may grant an action outside the allow-list, grant
    /// bare `*`, or use an unscoped resource for a mutating action.
    pub fn verify(&self) -> SynthResult<()> {
        for statement in self.boundary_statements.iter().chain(&self.role_statements) {
            for action in &statement.actions {
                if action == "*" {
                    return Err(SynthError::TrustViolation("bare '*' action granted".to_string()));
                }
                if !ALLOWED_ACTIONS.contains(&action.as_str()) {
                    return Err(SynthError::TrustViolation(format!(
                        "action {action} is not on the allow-list"
                    )));
                }
                if statement.is_unscoped() && !UNSCOPED_ACTIONS.contains(&action.as_str()) {
                    return Err(SynthError::TrustViolation(format!(
                        "action {action} is granted on every resource"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl PolicyStatement {
    /// Whether this statement allows `action` on everything `resource`
    /// names. Action names compare case-insensitively, as the provider does.
    fn covers(&self, action: &str, resource: &Value) -> bool {
        let Some(resource) = resource_pattern(resource) else {
            return false;
        };
        let action = action.to_ascii_lowercase();
        self.actions
            .iter()
            .any(|a| glob_matches(&a.to_ascii_lowercase(), &action))
            && self
                .resources
                .iter()
                .filter_map(resource_pattern)
                .any(|pattern| glob_matches(pattern, resource))
    }
}

/// The ARN text of a resource entry: a literal or an `Fn::Sub` template.
fn resource_pattern(resource: &Value) -> Option<&str> {
    resource
        .as_str()
        .or_else(|| resource.get("Fn::Sub").and_then(Value::as_str))
}

/// Declare the boundary policy and CI role for the included `sub_graphs`.
/// `Base` is added when absent.
pub fn build_trust_boundary(
    graph: &mut ResourceGraph,
    params: &TopologyParameters,
    sub_graphs: &[SubGraph],
) -> SynthResult<TrustBoundary> {
    let name = params.service_name.as_str();

    let included: BTreeSet<SubGraph> = std::iter::once(SubGraph::Base)
        .chain(sub_graphs.iter().copied())
        .collect();
    let statements: Vec<PolicyStatement> = included.iter().flat_map(|s| s.statements(name)).collect();

    let boundary_policy_name = format!("{name}-deployment-boundary");
    let boundary_policy = graph.add(
        LogicalId::new(SCOPE, "PermissionBoundary"),
        Resource::new(
            "AWS::IAM::ManagedPolicy",
            json!({
                "ManagedPolicyName": boundary_policy_name,
                "Description": format!("Upper bound on what {name}'s CI role may do."),
                "PolicyDocument": policy_document(&statements),
            }),
        ),
    )?;

    let condition = TrustCondition::for_repo(&params.ci_org, &params.ci_repo);
    let ci_role_name = format!("{name}-ci-deploy");
    let ci_role = graph.add(
        LogicalId::new(SCOPE, "CiDeployRole"),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": ci_role_name,
                "AssumeRolePolicyDocument": condition.assume_role_policy(),
                "PermissionsBoundary": reference(&boundary_policy),
                "Policies": [inline_policy("deploy", &statements)],
                "MaxSessionDuration": 3600,
            }),
        ),
    )?;

    let boundary = TrustBoundary {
        ci_role_arn: get_att(&ci_role, "Arn"),
        boundary_policy,
        boundary_policy_name,
        ci_role,
        ci_role_name,
        sub_graphs: included.into_iter().collect(),
        boundary_statements: statements.clone(),
        role_statements: statements,
        condition,
    };

    if let Err(e) = boundary.verify() {
        warn!(service = %name, error = %e, "trust boundary rejected");
        return Err(e);
    }

    info!(
        service = %name,
        subject = %boundary.condition.subject_pattern,
        actions = boundary.effective_actions().len(),
        "ci trust boundary declared"
    );
    Ok(boundary)
}

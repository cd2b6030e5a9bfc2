//! IAM policy document helpers.

use serde_json::{Value, json};

pub const POLICY_VERSION: &str = "2012-10-17";

/// One `Allow` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    /// ARN patterns; may contain intrinsics.
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Value>) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    /// Whether any resource is the bare `*`.
    pub fn is_unscoped(&self) -> bool {
        self.resources.iter().any(|r| r == "*")
    }

    pub fn to_json(&self) -> Value {
        json!({
            "Effect": "Allow",
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

/// `{"Version": ..., "Statement": [...]}`
pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
    })
}

/// Trust policy letting an AWS service principal assume a role.
pub fn service_trust_policy(service: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// ARN of an AWS-managed policy.
pub fn managed_policy_arn(name: &str) -> Value {
    json!({ "Fn::Sub": format!("arn:${{AWS::Partition}}:iam::aws:policy/{name}") })
}

/// Inline policy entry for a role's `Policies` list.
pub fn inline_policy(name: &str, statements: &[PolicyStatement]) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": policy_document(statements),
    })
}

//! The declarative resource graph.
//!
//! A `ResourceGraph` maps logical ids to typed resources whose properties
//! are JSON values. Cross-resource wiring is expressed with intrinsic
//! references (`Ref`, `Fn::GetAtt`, `${Id}` inside `Fn::Sub`); the graph
//! derives implicit dependencies from them, so explicit `DependsOn` is
//! only needed for ordering that no property expresses.
//!
//! ```text
//! {"Ref": "NetworkVpc1A2B3C4D"}
//! {"Fn::GetAtt": ["ServiceLoadBalancer5E6F7A8B", "DNSName"]}
//! {"Fn::Sub": "arn:${AWS::Partition}:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/ecs/api*"}
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{SynthError, SynthResult};

/// Stable identifier of a resource within a graph.
///
/// Built from the construct path so that re-synthesis with the same
/// parameters yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// `<Scope><Name><hash8>`, where the hash covers `scope/name`.
    pub fn new(scope: &str, name: &str) -> Self {
        let digest = Sha256::digest(format!("{scope}/{name}").as_bytes());
        let suffix = hex::encode_upper(&digest[..4]);
        let mut id: String = scope
            .chars()
            .chain(name.chars())
            .filter(char::is_ascii_alphanumeric)
            .collect();
        id.push_str(&suffix);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Intrinsics ─────────────────────────────────────────────────────

/// `{"Ref": id}`
pub fn reference(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

/// `{"Fn::Join": [separator, parts]}`
pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

/// An ARN pattern in the current partition, region and account.
pub fn arn(service: &str, resource: &str) -> Value {
    sub(format!(
        "arn:${{AWS::Partition}}:{service}:${{AWS::Region}}:${{AWS::AccountId}}:{resource}"
    ))
}

/// An ARN pattern for a global service (no region component).
pub fn global_arn(service: &str, resource: &str) -> Value {
    sub(format!(
        "arn:${{AWS::Partition}}:{service}::${{AWS::AccountId}}:{resource}"
    ))
}

// ── Resources ──────────────────────────────────────────────────────

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<LogicalId>,
}

impl Resource {
    pub fn new(kind: &str, properties: Value) -> Self {
        Self {
            kind: kind.to_string(),
            properties,
            depends_on: BTreeSet::new(),
        }
    }

    /// Add an explicit ordering edge.
    pub fn depends_on(mut self, id: &LogicalId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    /// Look up a property by JSON pointer, e.g. `/HealthCheckPath`.
    pub fn property(&self, pointer: &str) -> Option<&Value> {
        self.properties.pointer(pointer)
    }

    /// Logical ids this resource's properties refer to.
    pub fn references(&self) -> BTreeSet<LogicalId> {
        let mut found = BTreeSet::new();
        collect_references(&self.properties, &mut found);
        found
    }

    /// Explicit and implicit dependencies together.
    pub fn dependencies(&self) -> BTreeSet<LogicalId> {
        let mut deps = self.references();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// An externally consumable stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

fn collect_references(value: &Value, found: &mut BTreeSet<LogicalId>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                push_target(target, found);
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt")
                && let Some(Value::String(target)) = parts.first()
            {
                push_target(target, found);
            }
            if let Some(Value::String(template)) = map.get("Fn::Sub") {
                for target in sub_placeholders(template) {
                    push_target(target, found);
                }
            }
            for child in map.values() {
                collect_references(child, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

fn push_target(target: &str, found: &mut BTreeSet<LogicalId>) {
    // Pseudo parameters (AWS::Region, ...) are not resources.
    if !target.starts_with("AWS::") {
        found.insert(LogicalId(target.to_string()));
    }
}

/// Names inside `${...}` placeholders; `${Id.Attr}` yields `Id`.
fn sub_placeholders(template: &str) -> impl Iterator<Item = &str> {
    template.split("${").skip(1).filter_map(|rest| {
        let end = rest.find('}')?;
        let name = &rest[..end];
        Some(name.split('.').next().unwrap_or(name))
    })
}

// ── Graph ──────────────────────────────────────────────────────────

/// A complete set of resources and outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    resources: BTreeMap<LogicalId, Resource>,
    outputs: BTreeMap<String, Output>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource under `id`. Ids are never overwritten.
    pub fn add(&mut self, id: LogicalId, resource: Resource) -> SynthResult<LogicalId> {
        if self.resources.contains_key(&id) {
            return Err(SynthError::DuplicateResource(id.to_string()));
        }
        tracing::trace!(resource = %id, kind = %resource.kind, "declared resource");
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &LogicalId) -> SynthResult<&mut Resource> {
        self.resources
            .get_mut(id)
            .ok_or_else(|| SynthError::ResourceNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogicalId, &Resource)> {
        self.resources.iter()
    }

    /// All resources of one type, e.g. `AWS::EC2::Subnet`.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> {
        self.resources.iter().filter(move |(_, r)| r.kind == kind)
    }

    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.of_kind(kind).count()
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) -> SynthResult<()> {
        if self.outputs.contains_key(name) {
            return Err(SynthError::DuplicateResource(format!("output {name}")));
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                description: description.to_string(),
                value,
            },
        );
        Ok(())
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&String, &Output)> {
        self.outputs.iter()
    }

    /// Every reference resolves and the dependency relation is acyclic.
    pub fn validate(&self) -> SynthResult<()> {
        for (id, resource) in &self.resources {
            for dep in resource.dependencies() {
                if !self.resources.contains_key(&dep) {
                    return Err(SynthError::DanglingReference {
                        from: id.to_string(),
                        to: dep.to_string(),
                    });
                }
            }
        }
        for (name, output) in &self.outputs {
            let mut refs = BTreeSet::new();
            collect_references(&output.value, &mut refs);
            if let Some(missing) = refs.into_iter().find(|r| !self.resources.contains_key(r)) {
                return Err(SynthError::DanglingReference {
                    from: format!("output {name}"),
                    to: missing.to_string(),
                });
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Resources ordered so that every dependency precedes its dependents.
    ///
    /// Ties are broken by logical id, so the order is deterministic.
    pub fn topological_order(&self) -> SynthResult<Vec<LogicalId>> {
        let mut indegree: BTreeMap<&LogicalId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<LogicalId, Vec<&LogicalId>> = BTreeMap::new();

        for (id, resource) in &self.resources {
            let deps: Vec<LogicalId> = resource
                .dependencies()
                .into_iter()
                .filter(|d| self.resources.contains_key(d))
                .collect();
            indegree.insert(id, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: VecDeque<&LogicalId> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    if let Some(n) = indegree.get_mut(child) {
                        *n -= 1;
                        if *n == 0 {
                            ready.push_back(child);
                        }
                    }
                }
            }
        }

        if order.len() != self.resources.len() {
            let stuck = indegree
                .iter()
                .find(|(_, n)| **n > 0)
                .map(|(id, _)| id.to_string())
                .unwrap_or_default();
            return Err(SynthError::DependencyCycle(stuck));
        }
        Ok(order)
    }

    /// Render as a CloudFormation-style template document.
    pub fn to_template(&self, description: &str) -> Value {
        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": description,
            "Resources": self.resources,
            "Outputs": self.outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(props: Value) -> Resource {
        Resource::new("AWS::S3::Bucket", props)
    }

    #[test]
    fn logical_ids_are_stable_and_alphanumeric() {
        let a = LogicalId::new("Network", "Vpc");
        let b = LogicalId::new("Network", "Vpc");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("NetworkVpc"));
        assert_eq!(a.as_str().len(), "NetworkVpc".len() + 8);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, LogicalId::new("Network", "Vpc2"));
    }

    #[test]
    fn scope_is_part_of_the_hash() {
        // Same concatenation, different path.
        assert_ne!(LogicalId::new("Ab", "C"), LogicalId::new("A", "bC"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut graph = ResourceGraph::new();
        let id = LogicalId::new("S", "Bucket");
        graph.add(id.clone(), bucket(json!({}))).unwrap();
        let err = graph.add(id, bucket(json!({}))).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateResource(_)));
    }

    #[test]
    fn references_cover_all_intrinsics() {
        let a = LogicalId::new("S", "A");
        let b = LogicalId::new("S", "B");
        let c = LogicalId::new("S", "C");
        let r = bucket(json!({
            "One": reference(&a),
            "Two": [get_att(&b, "Arn")],
            "Three": sub(format!("${{{c}.Arn}}/x-${{AWS::Region}}")),
        }));
        let refs = r.references();
        assert_eq!(refs, [a, b, c].into_iter().collect());
    }

    #[test]
    fn dangling_reference_fails_validation() {
        let mut graph = ResourceGraph::new();
        let ghost = LogicalId::new("S", "Ghost");
        graph
            .add(LogicalId::new("S", "A"), bucket(json!({ "X": reference(&ghost) })))
            .unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, SynthError::DanglingReference { .. }));
    }

    #[test]
    fn dangling_output_fails_validation() {
        let mut graph = ResourceGraph::new();
        graph
            .add_output("Out", "nothing", reference(&LogicalId::new("S", "Ghost")))
            .unwrap();
        assert!(matches!(
            graph.validate(),
            Err(SynthError::DanglingReference { .. })
        ));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let mut graph = ResourceGraph::new();
        let a = LogicalId::new("S", "A");
        let b = LogicalId::new("S", "B");
        let c = LogicalId::new("S", "C");
        graph.add(c.clone(), bucket(json!({ "X": reference(&b) }))).unwrap();
        graph.add(b.clone(), bucket(json!({})).depends_on(&a)).unwrap();
        graph.add(a.clone(), bucket(json!({}))).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |id: &LogicalId| order.iter().position(|o| o == id).unwrap();
        assert!(pos(&a) < pos(&b));
        assert!(pos(&b) < pos(&c));
    }

    #[test]
    fn cycles_are_detected() {
        let mut graph = ResourceGraph::new();
        let a = LogicalId::new("S", "A");
        let b = LogicalId::new("S", "B");
        graph.add(a.clone(), bucket(json!({ "X": reference(&b) }))).unwrap();
        graph.add(b, bucket(json!({ "X": reference(&a) }))).unwrap();
        assert!(matches!(graph.validate(), Err(SynthError::DependencyCycle(_))));
    }

    #[test]
    fn template_shape() {
        let mut graph = ResourceGraph::new();
        let a = LogicalId::new("S", "A");
        graph.add(a.clone(), bucket(json!({ "Name": "x" }))).unwrap();
        graph.add_output("Name", "bucket", reference(&a)).unwrap();

        let template = graph.to_template("test");
        assert_eq!(template["Resources"][a.as_str()]["Type"], "AWS::S3::Bucket");
        assert!(template["Resources"][a.as_str()].get("DependsOn").is_none());
        assert_eq!(template["Outputs"]["Name"]["Value"]["Ref"], a.as_str());
    }
}

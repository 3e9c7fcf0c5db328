//! Condition trees attached to policies (`success_conditions`,
//! `failure_conditions`, `lock_conditions`).
//!
//! The JSON shape is positional rather than tagged:
//!
//! ```json
//! { "any_of": [[{ "path": "$.password-authentication.success_count",
//!                 "type": "integer", "operation": "gte", "value": 1 }]] }
//! ```
//!
//! `any_of` holds branches (OR of ANDs), `all_of` holds entries that must all
//! hold, and `conditions` is a flat AND list. A bare leaf is also accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_CONDITION_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Number,
    String,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Eq,
    #[serde(alias = "ne")]
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    Exists,
    Missing,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Eq => "eq",
            Operation::Neq => "neq",
            Operation::Gt => "gt",
            Operation::Gte => "gte",
            Operation::Lt => "lt",
            Operation::Lte => "lte",
            Operation::In => "in",
            Operation::Nin => "nin",
            Operation::Contains => "contains",
            Operation::Exists => "exists",
            Operation::Missing => "missing",
        }
    }

    fn takes_operand(&self) -> bool {
        !matches!(self, Operation::Exists | Operation::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionLeaf {
    pub path: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionLeaf {
    /// Path with the optional JSONPath-style `$.` root marker removed.
    pub fn normalized_path(&self) -> &str {
        let path = self.path.trim();
        path.strip_prefix("$.")
            .or_else(|| path.strip_prefix('$'))
            .unwrap_or(path)
    }
}

/// Composite nodes reject keys they do not know, so an object mixing
/// `any_of` with `all_of` (or carrying a typo) matches no variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    AnyOf(AnyOfNode),
    AllOf(AllOfNode),
    Conditions(ConditionsNode),
    Leaf(ConditionLeaf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnyOfNode {
    pub any_of: Vec<ConditionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllOfNode {
    pub all_of: Vec<ConditionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionsNode {
    pub conditions: Vec<ConditionNode>,
}

/// One element of an `any_of`/`all_of` list: either a branch (implicit AND)
/// or a single nested node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionEntry {
    Branch(Vec<ConditionNode>),
    Node(ConditionNode),
}

impl ConditionEntry {
    fn depth(&self) -> usize {
        match self {
            ConditionEntry::Branch(nodes) => nodes.iter().map(ConditionNode::depth).max().unwrap_or(0),
            ConditionEntry::Node(node) => node.depth(),
        }
    }

    fn check_nested(&self, field: &str) -> Result<(), String> {
        match self {
            ConditionEntry::Branch(nodes) if nodes.is_empty() => {
                Err(format!("{}: condition branch must not be empty", field))
            }
            ConditionEntry::Branch(nodes) => nodes
                .iter()
                .try_for_each(|node| node.check_nested(field, false)),
            ConditionEntry::Node(node) => node.check_nested(field, false),
        }
    }

    fn leaves<'a>(&'a self, out: &mut Vec<&'a ConditionLeaf>) {
        match self {
            ConditionEntry::Branch(nodes) => nodes.iter().for_each(|n| n.collect_leaves(out)),
            ConditionEntry::Node(node) => node.collect_leaves(out),
        }
    }
}

impl ConditionNode {
    pub fn depth(&self) -> usize {
        match self {
            ConditionNode::Leaf(_) => 1,
            ConditionNode::AnyOf(AnyOfNode { any_of: entries })
            | ConditionNode::AllOf(AllOfNode { all_of: entries }) => {
                1 + entries.iter().map(ConditionEntry::depth).max().unwrap_or(0)
            }
            ConditionNode::Conditions(ConditionsNode { conditions }) => {
                1 + conditions.iter().map(ConditionNode::depth).max().unwrap_or(0)
            }
        }
    }

    /// True when the tree carries no predicate at all (`{"conditions": []}`,
    /// `{"any_of": []}`), meaning "nothing configured".
    pub fn is_empty(&self) -> bool {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves.is_empty()
    }

    pub fn leaves(&self) -> Vec<&ConditionLeaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ConditionLeaf>) {
        match self {
            ConditionNode::Leaf(leaf) => out.push(leaf),
            ConditionNode::AnyOf(AnyOfNode { any_of: entries })
            | ConditionNode::AllOf(AllOfNode { all_of: entries }) => {
                entries.iter().for_each(|e| e.leaves(out))
            }
            ConditionNode::Conditions(ConditionsNode { conditions }) => {
                conditions.iter().for_each(|n| n.collect_leaves(out))
            }
        }
    }

    /// Structural checks run before a tree is persisted. `field` names the
    /// owning attribute in error messages.
    pub fn check(&self, field: &str) -> Result<(), String> {
        if self.depth() > MAX_CONDITION_DEPTH {
            return Err(format!(
                "{} exceeds the maximum nesting depth of {}",
                field, MAX_CONDITION_DEPTH
            ));
        }

        self.check_nested(field, true)?;

        for leaf in self.leaves() {
            check_leaf(field, leaf)?;
        }
        Ok(())
    }

    /// Only the root may be an empty composite ("nothing configured"). An
    /// empty branch or nested composite would otherwise read as always true
    /// inside an `any_of`.
    fn check_nested(&self, field: &str, root: bool) -> Result<(), String> {
        let (name, empty) = match self {
            ConditionNode::Leaf(_) => return Ok(()),
            ConditionNode::AnyOf(node) => ("any_of", node.any_of.is_empty()),
            ConditionNode::AllOf(node) => ("all_of", node.all_of.is_empty()),
            ConditionNode::Conditions(node) => ("conditions", node.conditions.is_empty()),
        };
        if empty && !root {
            return Err(format!("{}: nested '{}' must not be empty", field, name));
        }

        match self {
            ConditionNode::AnyOf(AnyOfNode { any_of: entries })
            | ConditionNode::AllOf(AllOfNode { all_of: entries }) => {
                for entry in entries {
                    entry.check_nested(field)?;
                }
            }
            ConditionNode::Conditions(ConditionsNode { conditions }) => {
                for node in conditions {
                    node.check_nested(field, false)?;
                }
            }
            ConditionNode::Leaf(_) => {}
        }
        Ok(())
    }
}

fn check_leaf(field: &str, leaf: &ConditionLeaf) -> Result<(), String> {
    if leaf.normalized_path().is_empty() {
        return Err(format!("{}: condition path must not be empty", field));
    }

    let op = leaf.operation;
    if !op.takes_operand() {
        return Ok(());
    }

    let value = leaf.value.as_ref().ok_or_else(|| {
        format!(
            "{}: operation '{}' on '{}' requires a value",
            field,
            op.as_str(),
            leaf.path
        )
    })?;

    let operands: Vec<&Value> = match (op, value) {
        (Operation::In | Operation::Nin, Value::Array(items)) => items.iter().collect(),
        (Operation::In | Operation::Nin, _) => {
            return Err(format!(
                "{}: operation '{}' on '{}' requires an array value",
                field,
                op.as_str(),
                leaf.path
            ));
        }
        (_, Value::Array(_) | Value::Object(_)) => {
            return Err(format!(
                "{}: operation '{}' on '{}' requires a scalar value",
                field,
                op.as_str(),
                leaf.path
            ));
        }
        (_, other) => vec![other],
    };

    if let Some(value_type) = leaf.value_type {
        if value_type == ValueType::Boolean
            && matches!(op, Operation::Gt | Operation::Gte | Operation::Lt | Operation::Lte)
        {
            return Err(format!(
                "{}: boolean condition on '{}' cannot use '{}'",
                field,
                leaf.path,
                op.as_str()
            ));
        }
        for operand in operands {
            if !conforms(value_type, operand) {
                return Err(format!(
                    "{}: value {} on '{}' is not a valid {:?}",
                    field, operand, leaf.path, value_type
                ));
            }
        }
    }

    Ok(())
}

fn conforms(value_type: ValueType, value: &Value) -> bool {
    match value_type {
        ValueType::Integer => value.as_i64().is_some(),
        ValueType::Number => value.is_number(),
        ValueType::String => value.is_string(),
        ValueType::Boolean => value.is_boolean(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_tree() -> Value {
        json!({
            "any_of": [[{
                "path": "$.password-authentication.success_count",
                "type": "integer",
                "operation": "gte",
                "value": 1
            }]]
        })
    }

    #[test]
    fn test_parses_nested_any_of() {
        let node: ConditionNode = serde_json::from_value(success_tree()).unwrap();
        match &node {
            ConditionNode::AnyOf(AnyOfNode { any_of }) => {
                assert_eq!(any_of.len(), 1);
                assert!(matches!(&any_of[0], ConditionEntry::Branch(b) if b.len() == 1));
            }
            other => panic!("unexpected node: {:?}", other),
        }
        assert_eq!(node.depth(), 2);
        assert_eq!(
            node.leaves()[0].normalized_path(),
            "password-authentication.success_count"
        );
    }

    #[test]
    fn test_serialization_round_trips() {
        let node: ConditionNode = serde_json::from_value(success_tree()).unwrap();
        assert_eq!(serde_json::to_value(&node).unwrap(), success_tree());
    }

    #[test]
    fn test_ne_alias_is_accepted() {
        let leaf: ConditionLeaf = serde_json::from_value(json!({
            "path": "user.status", "type": "string", "operation": "ne", "value": "locked"
        }))
        .unwrap();
        assert_eq!(leaf.operation, Operation::Neq);
    }

    #[test]
    fn test_empty_conditions() {
        let node: ConditionNode = serde_json::from_value(json!({ "conditions": [] })).unwrap();
        assert!(node.is_empty());
        assert!(node.check("success_conditions").is_ok());
    }

    #[test]
    fn test_unknown_leaf_fields_are_rejected() {
        let result: Result<ConditionNode, _> = serde_json::from_value(json!({
            "path": "a", "operation": "eq", "value": 1, "bogus": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_check_rejects_type_mismatch() {
        let node: ConditionNode = serde_json::from_value(json!({
            "any_of": [[{ "path": "a", "type": "integer", "operation": "gte", "value": "one" }]]
        }))
        .unwrap();
        assert!(node.check("success_conditions").is_err());
    }

    #[test]
    fn test_check_requires_array_for_membership() {
        let node: ConditionNode = serde_json::from_value(json!({
            "path": "request.client_id", "type": "string", "operation": "in", "value": "web"
        }))
        .unwrap();
        assert!(node.check("failure_conditions").is_err());
    }

    #[test]
    fn test_check_rejects_deep_trees() {
        let mut tree = json!({ "path": "a", "operation": "exists" });
        for _ in 0..MAX_CONDITION_DEPTH {
            tree = json!({ "all_of": [tree] });
        }
        let node: ConditionNode = serde_json::from_value(tree).unwrap();
        assert_eq!(node.depth(), MAX_CONDITION_DEPTH + 1);
        assert!(node.check("lock_conditions").is_err());
    }

    #[test]
    fn test_check_rejects_empty_branch() {
        let node: ConditionNode = serde_json::from_value(json!({
            "any_of": [[], [{
                "path": "password-authentication.success_count",
                "type": "integer",
                "operation": "gte",
                "value": 1
            }]]
        }))
        .unwrap();
        let err = node.check("success_conditions").unwrap_err();
        assert!(err.contains("branch must not be empty"));
    }

    #[test]
    fn test_check_rejects_empty_nested_composite() {
        for tree in [
            json!({ "any_of": [{ "all_of": [] }] }),
            json!({ "all_of": [[{ "any_of": [] }]] }),
            json!({ "conditions": [{ "conditions": [] }] }),
        ] {
            let node: ConditionNode = serde_json::from_value(tree.clone()).unwrap();
            assert!(node.check("success_conditions").is_err(), "accepted {}", tree);
        }
    }

    #[test]
    fn test_mixed_composite_keys_are_rejected() {
        let leaf = json!({ "path": "fido2-authentication.success_count", "operation": "gte", "value": 1 });
        let mixed: Result<ConditionNode, _> =
            serde_json::from_value(json!({ "any_of": [[leaf.clone()]], "all_of": [[leaf.clone()]] }));
        assert!(mixed.is_err());

        let misspelled: Result<ConditionNode, _> =
            serde_json::from_value(json!({ "any_of": [[leaf]], "operatoin": "x" }));
        assert!(misspelled.is_err());
    }
}

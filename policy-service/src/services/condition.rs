//! Condition evaluator: a total, side-effect free interpreter over
//! [`ConditionNode`] trees. Missing data never errors; it just fails the leaf.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{json, Value};

use crate::models::{
    AuthenticationTransaction, ConditionEntry, ConditionLeaf, ConditionNode, Operation, ValueType,
    MAX_CONDITION_DEPTH,
};

/// Flat `dotted.path -> value` view of a transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    values: HashMap<String, Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.values.insert(path.into(), value);
    }

    pub fn with(mut self, path: impl Into<String>, value: Value) -> Self {
        self.insert(path, value);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    /// Exposes `<type>.{call,success,failure}_count` per interaction plus the
    /// request (`request.client_id`, `request.scopes`, `request.acr_values`)
    /// and `user.id` once known.
    pub fn for_transaction(tx: &AuthenticationTransaction) -> Self {
        let mut ctx = Self::new();
        for (interaction_type, record) in &tx.interactions {
            ctx.insert(
                format!("{}.call_count", interaction_type),
                json!(record.call_count),
            );
            ctx.insert(
                format!("{}.success_count", interaction_type),
                json!(record.success_count),
            );
            ctx.insert(
                format!("{}.failure_count", interaction_type),
                json!(record.failure_count),
            );
        }

        ctx.insert("request.client_id", json!(tx.request.client_id));
        ctx.insert("request.scopes", json!(tx.request.scopes));
        ctx.insert("request.acr_values", json!(tx.request.acr_values));
        if let Some(user_id) = &tx.user_id {
            ctx.insert("user.id", json!(user_id));
        }
        ctx
    }
}

pub fn evaluate(node: &ConditionNode, ctx: &EvaluationContext) -> bool {
    evaluate_at(node, ctx, 1)
}

fn evaluate_at(node: &ConditionNode, ctx: &EvaluationContext, depth: usize) -> bool {
    if depth > MAX_CONDITION_DEPTH {
        tracing::warn!(depth, "Condition tree exceeds maximum depth; treating as unsatisfied");
        return false;
    }

    match node {
        ConditionNode::Leaf(leaf) => evaluate_leaf(leaf, ctx),
        ConditionNode::AnyOf(node) => node.any_of.iter().any(|e| evaluate_entry(e, ctx, depth + 1)),
        ConditionNode::AllOf(node) => node.all_of.iter().all(|e| evaluate_entry(e, ctx, depth + 1)),
        ConditionNode::Conditions(node) => node
            .conditions
            .iter()
            .all(|n| evaluate_at(n, ctx, depth + 1)),
    }
}

fn evaluate_entry(entry: &ConditionEntry, ctx: &EvaluationContext, depth: usize) -> bool {
    match entry {
        // An empty branch never satisfies its `any_of`.
        ConditionEntry::Branch(nodes) => {
            !nodes.is_empty() && nodes.iter().all(|n| evaluate_at(n, ctx, depth))
        }
        ConditionEntry::Node(node) => evaluate_at(node, ctx, depth),
    }
}

fn evaluate_leaf(leaf: &ConditionLeaf, ctx: &EvaluationContext) -> bool {
    let actual = ctx.get(leaf.normalized_path()).filter(|v| !v.is_null());

    match leaf.operation {
        Operation::Exists => return actual.is_some(),
        Operation::Missing => return actual.is_none(),
        _ => {}
    }

    let (Some(actual), Some(expected)) = (actual, leaf.value.as_ref()) else {
        return false;
    };
    let Some(value_type) = leaf.value_type.or_else(|| infer_type(expected)) else {
        return false;
    };

    match leaf.operation {
        Operation::Eq => compare(actual, expected, value_type) == Some(Ordering::Equal),
        Operation::Neq => compare(actual, expected, value_type).is_some_and(|o| o.is_ne()),
        Operation::Gt | Operation::Gte | Operation::Lt | Operation::Lte
            if value_type == ValueType::Boolean =>
        {
            false
        }
        Operation::Gt => compare(actual, expected, value_type) == Some(Ordering::Greater),
        Operation::Gte => compare(actual, expected, value_type).is_some_and(|o| o.is_ge()),
        Operation::Lt => compare(actual, expected, value_type) == Some(Ordering::Less),
        Operation::Lte => compare(actual, expected, value_type).is_some_and(|o| o.is_le()),
        Operation::In => expected.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|item| compare(actual, item, value_type) == Some(Ordering::Equal))
        }),
        Operation::Nin => expected.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|item| compare(actual, item, value_type).is_some_and(|o| o.is_ne()))
        }),
        Operation::Contains => match actual {
            Value::Array(items) => items
                .iter()
                .any(|item| compare(item, expected, value_type) == Some(Ordering::Equal)),
            Value::String(haystack) => expected
                .as_str()
                .is_some_and(|needle| haystack.contains(needle)),
            _ => false,
        },
        Operation::Exists | Operation::Missing => false,
    }
}

fn infer_type(expected: &Value) -> Option<ValueType> {
    match expected {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Integer),
        Value::Number(_) => Some(ValueType::Number),
        Value::String(_) => Some(ValueType::String),
        Value::Bool(_) => Some(ValueType::Boolean),
        Value::Array(items) => items.first().and_then(infer_type),
        Value::Null | Value::Object(_) => None,
    }
}

#[derive(Debug, PartialEq, PartialOrd)]
enum Scalar {
    Integer(i64),
    Number(f64),
    Text(String),
    Boolean(bool),
}

fn coerce(value: &Value, value_type: ValueType) -> Option<Scalar> {
    match value_type {
        ValueType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Scalar::Integer),
            Value::String(s) => s.trim().parse().ok().map(Scalar::Integer),
            _ => None,
        },
        ValueType::Number => match value {
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => s.trim().parse().ok().map(Scalar::Number),
            _ => None,
        },
        ValueType::String => match value {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => Some(Scalar::Text(n.to_string())),
            Value::Bool(b) => Some(Scalar::Text(b.to_string())),
            _ => None,
        },
        ValueType::Boolean => match value {
            Value::Bool(b) => Some(Scalar::Boolean(*b)),
            Value::String(s) => s.trim().parse().ok().map(Scalar::Boolean),
            _ => None,
        },
    }
}

fn compare(actual: &Value, expected: &Value, value_type: ValueType) -> Option<Ordering> {
    let actual = coerce(actual, value_type)?;
    let expected = coerce(expected, value_type)?;
    actual.partial_cmp(&expected)
}

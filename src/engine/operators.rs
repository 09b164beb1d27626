//! Named operators applied at transform time.
//!
//! The engine only guarantees ordering and input availability; what an
//! operator does to the document is its own business. Operators are plain
//! functions resolved by name through an [`OperatorRegistry`], with a small
//! built-in set covering the common field rewrites.

use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use thiserror::Error;

use crate::graph::{FieldRef, TransformNode};
use crate::keypath;

/// Failure of a single operator on a single document.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct OperatorError(pub String);

/// Everything an operator may inspect while rewriting a document.
pub struct OperatorContext<'a> {
    /// The node being applied.
    pub node: &'a TransformNode,
    /// Input field references (the node's own field list).
    pub inputs: &'a [FieldRef],
    /// Fields derived by this node (targets of its synthetic edges).
    pub outputs: Vec<FieldRef>,
    /// Operator parameters from the node's metadata.
    pub params: &'a JsonMap<String, JsonValue>,
}

/// Signature shared by all operators.
pub type OperatorFn = fn(&mut JsonValue, &OperatorContext) -> Result<(), OperatorError>;

/// Lookup table from operator name to implementation.
pub struct OperatorRegistry {
    operators: HashMap<String, OperatorFn>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OperatorRegistry {
    /// An empty registry; every operator must be registered by the caller.
    pub fn new() -> Self {
        OperatorRegistry {
            operators: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in operators.
    pub fn with_builtins() -> Self {
        OperatorRegistry {
            operators: builtin_operators(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, operator: OperatorFn) {
        self.operators.insert(name.into(), operator);
    }

    pub fn get(&self, name: &str) -> Option<OperatorFn> {
        self.operators.get(name).copied()
    }
}

/// Returns the built-in operator set.
pub fn builtin_operators() -> HashMap<String, OperatorFn> {
    let mut operators: HashMap<String, OperatorFn> = HashMap::new();
    operators.insert("uppercase".to_string(), uppercase);
    operators.insert("lowercase".to_string(), lowercase);
    operators.insert("copy".to_string(), copy);
    operators.insert("concat".to_string(), concat);
    operators.insert("set".to_string(), set_constant);
    operators.insert("cast".to_string(), cast);
    operators
}

fn map_strings(
    doc: &mut JsonValue,
    ctx: &OperatorContext,
    apply: fn(&str) -> String,
) -> Result<(), OperatorError> {
    let mut bad: Option<String> = None;
    for input in ctx.inputs {
        keypath::for_each_value_mut(doc, &input.path, &mut |value| {
            if let Some(text) = value.as_str() {
                *value = JsonValue::String(apply(text));
            } else if !value.is_null() && bad.is_none() {
                bad = Some(format!("value at {} is not a string", input.path));
            }
        });
    }
    match bad {
        Some(message) => Err(OperatorError(message)),
        None => Ok(()),
    }
}

fn uppercase(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    map_strings(doc, ctx, |s| s.to_uppercase())
}

fn lowercase(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    map_strings(doc, ctx, |s| s.to_lowercase())
}

fn copy(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    let source = ctx
        .inputs
        .first()
        .ok_or_else(|| OperatorError("copy requires an input field".to_string()))?;
    let target = ctx
        .outputs
        .first()
        .ok_or_else(|| OperatorError("copy requires a derived field".to_string()))?;
    if let Some(value) = keypath::get_value(doc, &source.path).cloned() {
        keypath::set_value(doc, &target.path, value);
    }
    Ok(())
}

fn concat(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    let target = ctx
        .outputs
        .first()
        .ok_or_else(|| OperatorError("concat requires a derived field".to_string()))?;
    let separator = ctx
        .params
        .get("separator")
        .and_then(JsonValue::as_str)
        .unwrap_or("");
    let mut parts = Vec::new();
    for input in ctx.inputs {
        match keypath::get_value(doc, &input.path) {
            Some(JsonValue::String(text)) => parts.push(text.clone()),
            Some(JsonValue::Null) | None => {}
            Some(other) => parts.push(other.to_string()),
        }
    }
    keypath::set_value(doc, &target.path, JsonValue::String(parts.join(separator)));
    Ok(())
}

fn set_constant(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    let value = ctx
        .params
        .get("value")
        .ok_or_else(|| OperatorError("set requires a value parameter".to_string()))?
        .clone();
    let targets = if ctx.outputs.is_empty() {
        ctx.inputs.to_vec()
    } else {
        ctx.outputs.clone()
    };
    for target in &targets {
        keypath::set_value(doc, &target.path, value.clone());
    }
    Ok(())
}

/// Casts every addressed value in place. The target type comes from the
/// `castType` parameter (legacy steps) or `to` (current ones).
fn cast(doc: &mut JsonValue, ctx: &OperatorContext) -> Result<(), OperatorError> {
    let target_type = ctx
        .params
        .get("castType")
        .or_else(|| ctx.params.get("to"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| OperatorError("cast requires a castType parameter".to_string()))?
        .to_string();
    let mut bad: Option<String> = None;
    for input in ctx.inputs {
        keypath::for_each_value_mut(doc, &input.path, &mut |value| {
            if bad.is_some() || value.is_null() {
                return;
            }
            match cast_value(value, &target_type) {
                Ok(casted) => *value = casted,
                Err(message) => bad = Some(format!("{} at {}", message, input.path)),
            }
        });
    }
    match bad {
        Some(message) => Err(OperatorError(message)),
        None => Ok(()),
    }
}

fn cast_value(value: &JsonValue, target_type: &str) -> Result<JsonValue, String> {
    match target_type {
        "string" => Ok(JsonValue::String(match value {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        })),
        "number" => match value {
            JsonValue::Number(_) => Ok(value.clone()),
            JsonValue::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("cannot cast {text:?} to number")),
            other => Err(format!("cannot cast {other} to number")),
        },
        "boolean" => match value {
            JsonValue::Bool(_) => Ok(value.clone()),
            JsonValue::String(text) => match text.as_str() {
                "true" => Ok(JsonValue::Bool(true)),
                "false" => Ok(JsonValue::Bool(false)),
                other => Err(format!("cannot cast {other:?} to boolean")),
            },
            other => Err(format!("cannot cast {other} to boolean")),
        },
        "array" => match value {
            JsonValue::Array(_) => Ok(value.clone()),
            other => Ok(JsonValue::Array(vec![other.clone()])),
        },
        other => Err(format!("unsupported cast target {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldId;
    use crate::graph::NodeKind;
    use crate::keypath::KeyPath;
    use serde_json::json;

    fn field_ref(id: FieldId, names: &[&str]) -> FieldRef {
        FieldRef {
            field: id,
            path: KeyPath::from_names(names.iter().copied()),
        }
    }

    fn node_with(inputs: Vec<FieldRef>, params: JsonMap<String, JsonValue>) -> TransformNode {
        TransformNode {
            id: 0,
            kind: NodeKind::Operator {
                name: "test".to_string(),
                params,
            },
            fields: inputs,
        }
    }

    #[test]
    fn test_uppercase_rewrites_strings() {
        let node = node_with(vec![field_ref(0, &["name"])], JsonMap::new());
        let ctx = OperatorContext {
            node: &node,
            inputs: &node.fields,
            outputs: Vec::new(),
            params: match &node.kind {
                NodeKind::Operator { params, .. } => params,
                _ => unreachable!(),
            },
        };
        let mut doc = json!({"name": "ada"});
        uppercase(&mut doc, &ctx).unwrap();
        assert_eq!(doc, json!({"name": "ADA"}));
    }

    #[test]
    fn test_uppercase_rejects_non_strings() {
        let node = node_with(vec![field_ref(0, &["age"])], JsonMap::new());
        let ctx = OperatorContext {
            node: &node,
            inputs: &node.fields,
            outputs: Vec::new(),
            params: match &node.kind {
                NodeKind::Operator { params, .. } => params,
                _ => unreachable!(),
            },
        };
        let mut doc = json!({"age": 41});
        assert!(uppercase(&mut doc, &ctx).is_err());
    }

    #[test]
    fn test_concat_joins_inputs() {
        let mut params = JsonMap::new();
        params.insert("separator".to_string(), json!(" "));
        let node = node_with(
            vec![field_ref(0, &["first"]), field_ref(1, &["last"])],
            params,
        );
        let ctx = OperatorContext {
            node: &node,
            inputs: &node.fields,
            outputs: vec![field_ref(2, &["full"])],
            params: match &node.kind {
                NodeKind::Operator { params, .. } => params,
                _ => unreachable!(),
            },
        };
        let mut doc = json!({"first": "Ada", "last": "Lovelace"});
        concat(&mut doc, &ctx).unwrap();
        assert_eq!(doc["full"], json!("Ada Lovelace"));
    }

    #[test]
    fn test_cast_string_to_number() {
        let mut params = JsonMap::new();
        params.insert("castType".to_string(), json!("number"));
        let node = node_with(vec![field_ref(0, &["price"])], params);
        let ctx = OperatorContext {
            node: &node,
            inputs: &node.fields,
            outputs: Vec::new(),
            params: match &node.kind {
                NodeKind::Operator { params, .. } => params,
                _ => unreachable!(),
            },
        };
        let mut doc = json!({"price": "12.5"});
        cast(&mut doc, &ctx).unwrap();
        assert_eq!(doc["price"], json!(12.5));
    }
}

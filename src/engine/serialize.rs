//! Persisted engine form.
//!
//! `to_json` and `load` are the round-trip contract used by the migration
//! pipeline and the persistence layer. Loading is deliberately lenient
//! about structural invariants: bookkeeping is rebuilt best-effort so the
//! validator, not the deserializer, is the one reporting corruption.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::EngineError;
use crate::fields::{FieldId, FieldTable};
use crate::graph::{EdgeLabel, Graph, IdentityRole, NodeId, TransformNode};

use super::Engine;

/// One serialized edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub label: EdgeLabel,
}

/// JSON-compatible engine snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEngine {
    pub fields: Vec<crate::fields::Field>,
    pub nodes: Vec<TransformNode>,
    pub edges: Vec<SerializedEdge>,
}

impl Engine {
    pub fn to_serialized(&self) -> SerializedEngine {
        SerializedEngine {
            fields: self.fields.records().to_vec(),
            nodes: self.graph.nodes().cloned().collect(),
            edges: self
                .graph
                .edges()
                .map(|(from, to, label)| SerializedEdge { from, to, label })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, EngineError> {
        Ok(serde_json::to_value(self.to_serialized())?)
    }

    /// Rebuilds an engine from its serialized form.
    pub fn load(serialized: SerializedEngine) -> Result<Engine, EngineError> {
        let fields = FieldTable::from_records(serialized.fields)?;
        let edges: Vec<(NodeId, NodeId, EdgeLabel)> = serialized
            .edges
            .iter()
            .map(|e| (e.from, e.to, e.label))
            .collect();
        let graph = Graph::from_parts(serialized.nodes, &edges)?;

        let mut roots: HashMap<FieldId, NodeId> = HashMap::new();
        for node in graph.nodes() {
            if matches!(
                node.identity_role(),
                Some(IdentityRole::Organic) | Some(IdentityRole::Synthetic)
            ) {
                if let Some(field_ref) = node.fields.first() {
                    roots.entry(field_ref.field).or_insert(node.id);
                }
            }
        }
        let mut terminals: HashMap<FieldId, NodeId> = HashMap::new();
        for (&field, &root) in &roots {
            if let Ok(terminal) = graph.terminal_from(root) {
                terminals.insert(field, terminal);
            }
        }

        Ok(Engine {
            fields,
            graph,
            roots,
            terminals,
        })
    }

    pub fn from_json(value: &JsonValue) -> Result<Engine, EngineError> {
        let serialized: SerializedEngine = serde_json::from_value(value.clone())?;
        Engine::load(serialized)
    }
}

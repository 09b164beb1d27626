//! The field transformation engine.
//!
//! Couples the field table with the transformation graph and exposes the
//! editing API, the execution planner, and the document transformer. Every
//! field's lineage lives in the graph as a chain of identity nodes: its
//! Organic or Synthetic origin, zero or more Renames, and possibly a final
//! Removal. Appended transform steps join their input fields' chains, so a
//! field's history is always a single non-branching walk.

mod operators;
mod planner;
mod serialize;

pub use operators::{
    builtin_operators, OperatorContext, OperatorError, OperatorFn, OperatorRegistry,
};
pub use planner::compute_execution_order;
pub use serialize::{SerializedEdge, SerializedEngine};

use log::{debug, info};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::fields::{Field, FieldId, FieldTable, FieldType};
use crate::graph::{EdgeLabel, FieldRef, Graph, IdentityRole, NodeId, NodeKind, TransformNode};
use crate::keypath::{self, KeyPath};
use crate::validator;

/// A field derived by a transformation.
#[derive(Debug, Clone)]
pub struct NewFieldSpec {
    pub path: KeyPath,
    pub field_type: FieldType,
}

/// Specification of a transformation step to append.
#[derive(Debug, Clone)]
pub struct TransformationSpec {
    pub kind: NodeKind,
    pub inputs: Vec<KeyPath>,
    pub new_fields: Vec<NewFieldSpec>,
}

impl TransformationSpec {
    /// A named operator over the given input fields.
    pub fn operator(name: impl Into<String>, inputs: Vec<KeyPath>) -> Self {
        TransformationSpec {
            kind: NodeKind::Operator {
                name: name.into(),
                params: JsonMap::new(),
            },
            inputs,
            new_fields: Vec::new(),
        }
    }

    /// A legacy operator carried over under the deprecated kind.
    pub fn deprecated(original_type: impl Into<String>, inputs: Vec<KeyPath>) -> Self {
        TransformationSpec {
            kind: NodeKind::Deprecated {
                original_type: original_type.into(),
                params: JsonMap::new(),
            },
            inputs,
            new_fields: Vec::new(),
        }
    }

    pub fn with_params(mut self, new_params: JsonMap<String, JsonValue>) -> Self {
        match &mut self.kind {
            NodeKind::Operator { params, .. } | NodeKind::Deprecated { params, .. } => {
                *params = new_params;
            }
            NodeKind::Identity { .. } => {}
        }
        self
    }

    pub fn with_new_field(mut self, path: KeyPath, field_type: FieldType) -> Self {
        self.new_fields.push(NewFieldSpec { path, field_type });
        self
    }
}

/// An operator failure at a specific node.
#[derive(Debug, Clone)]
pub struct NodeError {
    pub node: NodeId,
    pub message: String,
}

/// Outcome of transforming a single document.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub document: JsonValue,
    pub node_errors: Vec<NodeError>,
}

impl DocumentResult {
    pub fn is_success(&self) -> bool {
        self.node_errors.is_empty()
    }
}

/// Outcome of transforming a batch of documents.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<DocumentResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// The transformation engine: a field table plus the DAG describing how
/// each field is produced, renamed, derived, or removed.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    fields: FieldTable,
    graph: Graph,
    /// Organic/Synthetic identity node per field.
    roots: HashMap<FieldId, NodeId>,
    /// Last node on each field's non-synthetic chain.
    terminals: HashMap<FieldId, NodeId>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id)
    }

    /// The field's Organic or Synthetic identity node.
    pub fn identity_root(&self, id: FieldId) -> Option<NodeId> {
        self.roots.get(&id).copied()
    }

    /// The field's current terminal node.
    pub fn terminal_node(&self, id: FieldId) -> Option<NodeId> {
        self.terminals.get(&id).copied()
    }

    /// Adds an organic field at `path`.
    pub fn add_field(&mut self, path: KeyPath, field_type: FieldType) -> Result<FieldId, EngineError> {
        self.add_field_with_properties(path, field_type, JsonMap::new())
    }

    pub fn add_field_with_properties(
        &mut self,
        path: KeyPath,
        field_type: FieldType,
        properties: JsonMap<String, JsonValue>,
    ) -> Result<FieldId, EngineError> {
        self.create_field(path, field_type, properties, IdentityRole::Organic, None)
    }

    /// Adds an organic field whose path is fully specified, including
    /// concrete array indices.
    pub fn add_indexed_field(
        &mut self,
        path: KeyPath,
        field_type: FieldType,
    ) -> Result<FieldId, EngineError> {
        if !path.is_concrete() {
            return Err(EngineError::InvalidPath {
                path: path.to_string(),
                reason: "indexed fields require fully specified paths".to_string(),
            });
        }
        self.create_field(path, field_type, JsonMap::new(), IdentityRole::Organic, None)
    }

    /// Adds a String-typed field whose existence was inferred rather than
    /// declared, e.g. a wildcard array element implied by a transformation.
    pub fn add_inferred_field(&mut self, path: KeyPath) -> Result<FieldId, EngineError> {
        let mut properties = JsonMap::new();
        properties.insert("inferred".to_string(), json!(true));
        self.create_field(
            path,
            FieldType::String,
            properties,
            IdentityRole::Organic,
            None,
        )
    }

    fn create_field(
        &mut self,
        path: KeyPath,
        field_type: FieldType,
        properties: JsonMap<String, JsonValue>,
        role: IdentityRole,
        fed_by: Option<NodeId>,
    ) -> Result<FieldId, EngineError> {
        let id = self.fields.insert(path.clone(), field_type, properties)?;
        let node = self.graph.add_node(
            NodeKind::Identity { role },
            vec![FieldRef { field: id, path }],
        );
        if let Some(feeder) = fed_by {
            self.graph.add_edge(feeder, node, EdgeLabel::Synthetic)?;
        }
        self.roots.insert(id, node);
        self.terminals.insert(id, node);
        Ok(id)
    }

    /// Moves a live field to `new_path`, recording the move as a Rename
    /// identity node. Renaming a field to its current path is a no-op.
    pub fn rename_field(&mut self, id: FieldId, new_path: KeyPath) -> Result<(), EngineError> {
        let changed = self.fields.rename(id, new_path.clone())?;
        if !changed {
            return Ok(());
        }
        let terminal = self
            .terminals
            .get(&id)
            .copied()
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        let node = self.graph.add_node(
            NodeKind::Identity {
                role: IdentityRole::Rename,
            },
            vec![FieldRef {
                field: id,
                path: new_path,
            }],
        );
        self.graph.add_edge(terminal, node, EdgeLabel::Same)?;
        self.advance_terminals(terminal, node);
        Ok(())
    }

    /// Soft-removes a live field: appends a Removal identity node and frees
    /// the path. The field record and its history stay in place.
    pub fn remove_field(&mut self, id: FieldId) -> Result<(), EngineError> {
        let terminal = self
            .terminals
            .get(&id)
            .copied()
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        self.fields.mark_dead(id)?;
        let path = self
            .fields
            .path_of(id)
            .cloned()
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        let node = self.graph.add_node(
            NodeKind::Identity {
                role: IdentityRole::Removal,
            },
            vec![FieldRef { field: id, path }],
        );
        self.graph.add_edge(terminal, node, EdgeLabel::Same)?;
        self.advance_terminals(terminal, node);
        Ok(())
    }

    pub fn enable_field(&mut self, id: FieldId) -> Result<(), EngineError> {
        self.fields.set_enabled(id, true)
    }

    pub fn disable_field(&mut self, id: FieldId) -> Result<(), EngineError> {
        self.fields.set_enabled(id, false)
    }

    pub fn merge_field_properties(
        &mut self,
        id: FieldId,
        properties: JsonMap<String, JsonValue>,
    ) -> Result<(), EngineError> {
        self.fields.merge_properties(id, properties)
    }

    pub fn get_field_path(&self, id: FieldId) -> Option<&KeyPath> {
        self.fields.get(id).filter(|f| !f.dead).map(|f| &f.path)
    }

    pub fn get_field_id(&self, path: &KeyPath) -> Option<FieldId> {
        self.fields.id_at(path)
    }

    /// Ids of all live fields.
    pub fn get_all_field_ids(&self) -> Vec<FieldId> {
        self.fields
            .records()
            .iter()
            .filter(|f| !f.dead)
            .map(|f| f.id)
            .collect()
    }

    /// Appends a transform step over live fields.
    ///
    /// The node receives a `Same` edge from each referenced field's current
    /// terminal and becomes those fields' new terminal; derived fields are
    /// created with Synthetic identity nodes fed by the new step.
    pub fn append_transformation(
        &mut self,
        spec: TransformationSpec,
    ) -> Result<NodeId, EngineError> {
        if matches!(spec.kind, NodeKind::Identity { .. }) {
            return Err(EngineError::InvalidTransformation(
                "identity nodes are managed by the engine".to_string(),
            ));
        }
        if spec.inputs.is_empty() {
            return Err(EngineError::InvalidTransformation(
                "a transformation requires at least one input field".to_string(),
            ));
        }

        let mut input_ids = Vec::new();
        for path in &spec.inputs {
            let id = self
                .fields
                .id_at(path)
                .ok_or_else(|| EngineError::FieldNotFound(path.to_string()))?;
            if !input_ids.contains(&id) {
                input_ids.push(id);
            }
        }

        let refs: Vec<FieldRef> = input_ids
            .iter()
            .map(|&id| FieldRef {
                field: id,
                path: self.fields.path_of(id).cloned().unwrap_or_default(),
            })
            .collect();

        let node = self.graph.add_node(spec.kind, refs);
        let mut wired: HashSet<NodeId> = HashSet::new();
        for &id in &input_ids {
            let terminal = self
                .terminals
                .get(&id)
                .copied()
                .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
            if wired.insert(terminal) {
                self.graph.add_edge(terminal, node, EdgeLabel::Same)?;
                self.advance_terminals(terminal, node);
            }
        }

        for new_field in spec.new_fields {
            self.create_field(
                new_field.path,
                new_field.field_type,
                JsonMap::new(),
                IdentityRole::Synthetic,
                Some(node),
            )?;
        }

        debug!(
            "appended transformation node {} over {} input fields",
            node,
            input_ids.len()
        );
        Ok(node)
    }

    /// Deterministic topological order over the graph.
    pub fn compute_execution_order(&self) -> Result<Vec<NodeId>, EngineError> {
        planner::compute_execution_order(&self.graph)
    }

    /// Runs the engine against one document.
    ///
    /// Operator failures are recorded per node in the result instead of
    /// aborting; the outer error covers structural failures only.
    pub fn transform(
        &self,
        document: JsonValue,
        registry: &OperatorRegistry,
    ) -> Result<DocumentResult, EngineError> {
        let order = self.compute_execution_order()?;
        Ok(self.run_ordered(&order, document, registry))
    }

    /// Runs the engine against many documents, reporting per-document
    /// success so callers can surface partial failures.
    pub fn transform_batch(
        &self,
        documents: Vec<JsonValue>,
        registry: &OperatorRegistry,
    ) -> Result<BatchOutcome, EngineError> {
        let order = self.compute_execution_order()?;
        let mut results = Vec::with_capacity(documents.len());
        let mut succeeded = 0;
        let mut failed = 0;
        for document in documents {
            let result = self.run_ordered(&order, document, registry);
            if result.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }
            results.push(result);
        }
        info!("transformed {} documents: {succeeded} succeeded, {failed} failed", results.len());
        Ok(BatchOutcome {
            results,
            succeeded,
            failed,
        })
    }

    fn run_ordered(
        &self,
        order: &[NodeId],
        document: JsonValue,
        registry: &OperatorRegistry,
    ) -> DocumentResult {
        let mut doc = document;
        let mut node_errors = Vec::new();
        for &id in order {
            let Some(node) = self.graph.node(id) else {
                continue;
            };
            if let Err(err) = self.apply_node(&mut doc, node, registry) {
                node_errors.push(NodeError {
                    node: id,
                    message: err.to_string(),
                });
            }
        }
        DocumentResult {
            document: doc,
            node_errors,
        }
    }

    fn apply_node(
        &self,
        doc: &mut JsonValue,
        node: &TransformNode,
        registry: &OperatorRegistry,
    ) -> Result<(), OperatorError> {
        match &node.kind {
            NodeKind::Identity { role } => match role {
                IdentityRole::Organic | IdentityRole::Synthetic => Ok(()),
                IdentityRole::Rename => {
                    let Some(target) = node.fields.first() else {
                        return Ok(());
                    };
                    if let Some(prior) = self.prior_path(node.id, target.field) {
                        if prior != target.path {
                            keypath::move_value(doc, &prior, &target.path);
                        }
                    }
                    Ok(())
                }
                IdentityRole::Removal => {
                    if let Some(target) = node.fields.first() {
                        keypath::remove_value(doc, &target.path);
                    }
                    Ok(())
                }
            },
            NodeKind::Deprecated {
                original_type,
                params,
            } => self.apply_operator(doc, node, original_type, params, registry),
            NodeKind::Operator { name, params } => {
                self.apply_operator(doc, node, name, params, registry)
            }
        }
    }

    fn apply_operator(
        &self,
        doc: &mut JsonValue,
        node: &TransformNode,
        name: &str,
        params: &JsonMap<String, JsonValue>,
        registry: &OperatorRegistry,
    ) -> Result<(), OperatorError> {
        let operator = registry
            .get(name)
            .ok_or_else(|| OperatorError(format!("unknown operator: {name}")))?;
        let outputs: Vec<FieldRef> = self
            .graph
            .outgoing(node.id)
            .iter()
            .filter(|(_, label)| *label == EdgeLabel::Synthetic)
            .filter_map(|&(target, _)| self.graph.node(target))
            .filter(|n| matches!(n.identity_role(), Some(IdentityRole::Synthetic)))
            .filter_map(|n| n.fields.first().cloned())
            .collect();
        let ctx = OperatorContext {
            node,
            inputs: &node.fields,
            outputs,
            params,
        };
        operator(doc, &ctx)
    }

    /// Extending a chain moves every field riding it, not just the field
    /// that triggered the extension; stale per-field terminals would branch
    /// the chain on the next append.
    fn advance_terminals(&mut self, from: NodeId, to: NodeId) {
        for terminal in self.terminals.values_mut() {
            if *terminal == from {
                *terminal = to;
            }
        }
    }

    /// The path a field had at the node feeding `node` over a `Same` edge.
    fn prior_path(&self, node: NodeId, field: FieldId) -> Option<KeyPath> {
        self.graph
            .incoming(node)
            .iter()
            .find(|(_, label)| *label == EdgeLabel::Same)
            .and_then(|&(source, _)| self.graph.node(source))
            .and_then(|n| n.field_ref(field))
            .map(|r| r.path.clone())
    }

    /// Runs `edit` against a draft of the engine, validates the draft, and
    /// commits it only when it passes. A failed edit or an invalid draft
    /// leaves the engine untouched.
    pub fn apply_edit<F>(&mut self, edit: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Engine) -> Result<(), EngineError>,
    {
        let mut draft = self.clone();
        edit(&mut draft)?;
        let problems = validator::verify_engine(&draft);
        if !problems.is_empty() {
            return Err(EngineError::Validation { problems });
        }
        *self = draft;
        Ok(())
    }
}

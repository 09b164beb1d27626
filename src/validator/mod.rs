//! Structural validation of an engine.
//!
//! [`verify_engine`] is the single entry point: it returns a list of
//! human-readable diagnostics, empty when the engine is valid, and never
//! panics. It composes two checks: graph integrity, which short-circuits on
//! the first violation, and field integrity, which collects one diagnostic
//! per broken field. Callers run it after any bulk mutation (migration,
//! editing batches) so a malformed engine never reaches storage or the UI.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::engine::{compute_execution_order, Engine};
use crate::fields::{Field, FieldId};
use crate::graph::{EdgeLabel, IdentityRole, NodeId, NodeKind, WalkError};
use crate::keypath::KeyPath;

/// A single structural or field-level violation.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("node {node} is stored under vertex key {key}")]
    NodeKeyMismatch { node: NodeId, key: NodeId },

    #[error("identity node {node} must reference exactly one field")]
    MalformedIdentity { node: NodeId },

    #[error("identity node {node} references unknown field {field}")]
    UnknownFieldRef { node: NodeId, field: FieldId },

    #[error("field {field} has no organic or synthetic identity node")]
    MissingIdentity { field: FieldId },

    #[error("field {field} has conflicting identity nodes {first} and {second}")]
    ConflictingIdentity {
        field: FieldId,
        first: NodeId,
        second: NodeId,
    },

    #[error("organic identity node {node} (field {field}) has inbound edges")]
    OrganicWithInputs { node: NodeId, field: FieldId },

    #[error("synthetic identity node {node} (field {field}) has no inbound edges")]
    SyntheticWithoutInputs { node: NodeId, field: FieldId },

    #[error("synthetic identity node {node} (field {field}) has an inbound same edge")]
    SyntheticWithSameEdge { node: NodeId, field: FieldId },

    #[error("rename identity node {node} (field {field}) has no inbound same edge")]
    RenameWithoutSameEdge { node: NodeId, field: FieldId },

    #[error("removal identity node {node} (field {field}) has outbound edges")]
    RemovalWithOutputs { node: NodeId, field: FieldId },

    #[error("removal identity node {node} refers to live field {field}")]
    RemovalOfLiveField { node: NodeId, field: FieldId },

    #[error("node {node} is a graph source but not an organic identity node")]
    StraySource { node: NodeId },

    #[error("node {node} has multiple outbound non-synthetic edges")]
    BranchingPath { node: NodeId },

    #[error("identity walk for field {field} revisited node {node}; the graph is corrupt")]
    WalkLooped { field: FieldId, node: NodeId },

    #[error("field {field} terminal path {terminal} does not match its recorded path {recorded}")]
    TerminalPathMismatch {
        field: FieldId,
        terminal: String,
        recorded: String,
    },

    #[error("dead field {field} does not terminate in a removal node")]
    DeadWithoutRemoval { field: FieldId },

    #[error("{0}")]
    Cyclic(String),

    #[error("field {field} path {path} collides with field {other}")]
    DuplicatePath {
        field: FieldId,
        path: String,
        other: FieldId,
    },

    #[error("field {field} ({path}) is a {field_type} field and cannot own children")]
    PrimitiveWithChildren {
        field: FieldId,
        path: String,
        field_type: String,
    },

    #[error("field {field} ({path}) is disconnected from the field tree")]
    Disconnected { field: FieldId, path: String },
}

/// Checks every structural and field invariant, converting violations to
/// display strings. An empty list means the engine is valid.
pub fn verify_engine(engine: &Engine) -> Vec<String> {
    let mut problems = Vec::new();
    if let Err(err) = verify_graph_integrity(engine) {
        problems.push(err.to_string());
    }
    for err in verify_field_integrity(engine) {
        problems.push(err.to_string());
    }
    problems
}

/// Checks the graph-shape invariants, stopping at the first violation.
pub fn verify_graph_integrity(engine: &Engine) -> Result<(), ValidationError> {
    let graph = engine.graph();
    let fields = engine.fields();

    // a node's id is its vertex key
    for (key, node) in graph.nodes().enumerate() {
        if node.id != key as NodeId {
            return Err(ValidationError::NodeKeyMismatch {
                node: node.id,
                key: key as NodeId,
            });
        }
    }

    // identity accumulator: every field gets exactly one organic or
    // synthetic identity node, never both, never neither
    let mut roots: HashMap<FieldId, NodeId> = HashMap::new();
    for node in graph.nodes() {
        let NodeKind::Identity { role } = &node.kind else {
            continue;
        };
        if node.fields.len() != 1 {
            return Err(ValidationError::MalformedIdentity { node: node.id });
        }
        let field_ref = &node.fields[0];
        let Some(record) = fields.get(field_ref.field) else {
            return Err(ValidationError::UnknownFieldRef {
                node: node.id,
                field: field_ref.field,
            });
        };

        if matches!(role, IdentityRole::Organic | IdentityRole::Synthetic) {
            if let Some(&first) = roots.get(&field_ref.field) {
                return Err(ValidationError::ConflictingIdentity {
                    field: field_ref.field,
                    first,
                    second: node.id,
                });
            }
            roots.insert(field_ref.field, node.id);
        }

        let incoming = graph.incoming(node.id);
        match role {
            IdentityRole::Organic => {
                if !incoming.is_empty() {
                    return Err(ValidationError::OrganicWithInputs {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
            }
            IdentityRole::Synthetic => {
                if incoming.is_empty() {
                    return Err(ValidationError::SyntheticWithoutInputs {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
                if incoming.iter().any(|(_, label)| *label == EdgeLabel::Same) {
                    return Err(ValidationError::SyntheticWithSameEdge {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
            }
            IdentityRole::Rename => {
                if !incoming.iter().any(|(_, label)| *label == EdgeLabel::Same) {
                    return Err(ValidationError::RenameWithoutSameEdge {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
            }
            IdentityRole::Removal => {
                if !graph.outgoing(node.id).is_empty() {
                    return Err(ValidationError::RemovalWithOutputs {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
                if !record.dead {
                    return Err(ValidationError::RemovalOfLiveField {
                        node: node.id,
                        field: field_ref.field,
                    });
                }
            }
        }
    }

    for record in fields.records() {
        if !roots.contains_key(&record.id) {
            return Err(ValidationError::MissingIdentity { field: record.id });
        }
    }

    // no stray sources
    for id in graph.sources() {
        let is_organic = graph
            .node(id)
            .map(|n| matches!(n.identity_role(), Some(IdentityRole::Organic)))
            .unwrap_or(false);
        if !is_organic {
            return Err(ValidationError::StraySource { node: id });
        }
    }

    // one non-branching walk per field, ending at the recorded path
    for record in fields.records() {
        let Some(&root) = roots.get(&record.id) else {
            continue;
        };
        let chain = match graph.chain_from(root) {
            Ok(chain) => chain,
            Err(WalkError::Branching(node)) => {
                return Err(ValidationError::BranchingPath { node });
            }
            Err(WalkError::Revisited(_, node)) => {
                return Err(ValidationError::WalkLooped {
                    field: record.id,
                    node,
                });
            }
        };
        let terminal_is_removal = chain
            .last()
            .and_then(|&id| graph.node(id))
            .map(|node| matches!(node.identity_role(), Some(IdentityRole::Removal)))
            .unwrap_or(false);
        if terminal_is_removal {
            // a closed chain exempts every field riding it; role checks
            // above already tie removal nodes to dead fields
            continue;
        }
        if record.dead {
            return Err(ValidationError::DeadWithoutRemoval { field: record.id });
        }
        // the field's path as of the last chain node that references it
        let last_ref = chain
            .iter()
            .rev()
            .filter_map(|&id| graph.node(id))
            .find_map(|node| node.field_ref(record.id));
        let Some(last_ref) = last_ref else {
            continue;
        };
        if last_ref.path != record.path {
            return Err(ValidationError::TerminalPathMismatch {
                field: record.id,
                terminal: last_ref.path.to_string(),
                recorded: record.path.to_string(),
            });
        }
    }

    // the planner must succeed as well
    compute_execution_order(graph)
        .map(|_| ())
        .map_err(|err| ValidationError::Cyclic(err.to_string()))
}

/// Checks field-level invariants, collecting one diagnostic per broken
/// field instead of stopping early.
pub fn verify_field_integrity(engine: &Engine) -> Vec<ValidationError> {
    let fields = engine.fields();
    let mut problems = Vec::new();

    let live: Vec<&Field> = fields.records().iter().filter(|f| !f.dead).collect();

    // live paths are pairwise distinct
    let mut live_paths: HashMap<&KeyPath, FieldId> = HashMap::new();
    for field in &live {
        if let Some(&other) = live_paths.get(&field.path) {
            problems.push(ValidationError::DuplicatePath {
                field: field.id,
                path: field.path.to_string(),
                other,
            });
        } else {
            live_paths.insert(&field.path, field.id);
        }
    }

    // containment and connectivity, ancestors before descendants
    let mut ordered = live.clone();
    ordered.sort_by_key(|f| f.path.len());
    let mut connected: HashSet<FieldId> = HashSet::new();
    let mut flagged_primitives: HashSet<FieldId> = HashSet::new();
    for field in &ordered {
        if field.path.len() <= 1 {
            connected.insert(field.id);
            continue;
        }
        // nearest existing live ancestor
        let mut ancestor = None;
        for len in (1..field.path.len()).rev() {
            let prefix = KeyPath::new(field.path.steps()[..len].to_vec());
            if let Some(&ancestor_id) = live_paths.get(&prefix) {
                ancestor = Some(ancestor_id);
                break;
            }
        }
        match ancestor {
            None => problems.push(ValidationError::Disconnected {
                field: field.id,
                path: field.path.to_string(),
            }),
            Some(ancestor_id) => {
                if let Some(record) = fields.get(ancestor_id) {
                    if !record.field_type.owns_children()
                        && flagged_primitives.insert(ancestor_id)
                    {
                        problems.push(ValidationError::PrimitiveWithChildren {
                            field: ancestor_id,
                            path: record.path.to_string(),
                            field_type: record.field_type.as_str().to_string(),
                        });
                    }
                }
                if connected.contains(&ancestor_id) {
                    connected.insert(field.id);
                } else {
                    problems.push(ValidationError::Disconnected {
                        field: field.id,
                        path: field.path.to_string(),
                    });
                }
            }
        }
    }

    problems
}

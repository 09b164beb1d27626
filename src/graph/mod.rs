//! The transformation graph.
//!
//! Nodes live in an arena: a node's id is its index, so the "id equals
//! vertex key" rule holds by construction for engines built through the
//! editing API. Engines loaded from serialized form may still violate it;
//! the validator reports that instead of the loader.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use thiserror::Error;

use crate::error::EngineError;
use crate::fields::FieldId;
use crate::keypath::KeyPath;

/// Identifier of a graph node; equal to the node's arena index.
pub type NodeId = u32;

/// Label of a directed edge.
///
/// `Same` carries a value through unchanged (a rename, or a value flowing
/// into a transform step); `Synthetic` feeds a newly derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    Same,
    Synthetic,
}

/// Role of an identity node in a field's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityRole {
    /// The field pre-exists in the input document.
    Organic,
    /// The field is derived by a transformation.
    Synthetic,
    /// The field moved to a new path.
    Rename,
    /// The field was soft-removed; always a sink.
    Removal,
}

/// Reference to a field from a node, recording the field's path as of that
/// node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub field: FieldId,
    pub path: KeyPath,
}

/// What a node does, keyed by its serialized `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// A field's origin or fate rather than a computation step.
    Identity { role: IdentityRole },
    /// A legacy operator folded into one opaque variant at migration time;
    /// `original_type` names the operator it once was.
    Deprecated {
        original_type: String,
        #[serde(default)]
        params: JsonMap<String, JsonValue>,
    },
    /// An opaque named operator; its behavior is the operator's own
    /// responsibility, not the graph's.
    Operator {
        name: String,
        #[serde(default)]
        params: JsonMap<String, JsonValue>,
    },
}

/// One node of the transformation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformNode {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub fields: Vec<FieldRef>,
}

impl TransformNode {
    pub fn field_ref(&self, field: FieldId) -> Option<&FieldRef> {
        self.fields.iter().find(|r| r.field == field)
    }

    pub fn identity_role(&self) -> Option<IdentityRole> {
        match &self.kind {
            NodeKind::Identity { role } => Some(*role),
            _ => None,
        }
    }
}

/// Failure of the terminal-node walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error("node {0} has multiple outbound non-synthetic edges")]
    Branching(NodeId),
    #[error("walk from node {0} revisited node {1}")]
    Revisited(NodeId, NodeId),
}

/// Arena-backed DAG with labeled adjacency and predecessor lists.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<TransformNode>,
    outgoing: Vec<Vec<(NodeId, EdgeLabel)>>,
    incoming: Vec<Vec<(NodeId, EdgeLabel)>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_node(&mut self, kind: NodeKind, fields: Vec<FieldRef>) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(TransformNode { id, kind, fields });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds a labeled edge. Re-adding an identical edge is a no-op.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, label: EdgeLabel) -> Result<(), EngineError> {
        if from as usize >= self.nodes.len() {
            return Err(EngineError::NodeNotFound(from));
        }
        if to as usize >= self.nodes.len() {
            return Err(EngineError::NodeNotFound(to));
        }
        if from == to {
            return Err(EngineError::CyclicGraph(format!(
                "self-referential edge on node {from}"
            )));
        }
        if self.outgoing[from as usize].contains(&(to, label)) {
            return Ok(());
        }
        self.outgoing[from as usize].push((to, label));
        self.incoming[to as usize].push((from, label));
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&TransformNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TransformNode> {
        self.nodes.iter()
    }

    pub fn outgoing(&self, id: NodeId) -> &[(NodeId, EdgeLabel)] {
        self.outgoing.get(id as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: NodeId) -> &[(NodeId, EdgeLabel)] {
        self.incoming.get(id as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes with no inbound edges.
    pub fn sources(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming
            .iter()
            .enumerate()
            .filter(|(_, edges)| edges.is_empty())
            .map(|(id, _)| id as NodeId)
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, EdgeLabel)> + '_ {
        self.outgoing.iter().enumerate().flat_map(|(from, edges)| {
            edges
                .iter()
                .map(move |&(to, label)| (from as NodeId, to, label))
        })
    }

    /// Follows the unique outbound non-synthetic edge chain from `start`
    /// until it ends, returning every visited node in order. The walk is
    /// bounded by a visited set, so a corrupt graph can never fake a
    /// terminal.
    pub fn chain_from(&self, start: NodeId) -> Result<Vec<NodeId>, WalkError> {
        let mut visited = HashSet::from([start]);
        let mut chain = vec![start];
        let mut current = start;
        loop {
            let mut next = None;
            for &(target, label) in self.outgoing(current) {
                if label == EdgeLabel::Synthetic {
                    continue;
                }
                if next.is_some() {
                    return Err(WalkError::Branching(current));
                }
                next = Some(target);
            }
            match next {
                None => return Ok(chain),
                Some(target) => {
                    if !visited.insert(target) {
                        return Err(WalkError::Revisited(start, target));
                    }
                    chain.push(target);
                    current = target;
                }
            }
        }
    }

    /// The last node of the non-synthetic chain starting at `start`.
    pub fn terminal_from(&self, start: NodeId) -> Result<NodeId, WalkError> {
        self.chain_from(start)
            .map(|chain| chain.last().copied().unwrap_or(start))
    }

    /// Rebuilds a graph from serialized parts. Edge endpoints must exist;
    /// stored ids that disagree with their position are left for the
    /// validator to report.
    pub(crate) fn from_parts(
        nodes: Vec<TransformNode>,
        edges: &[(NodeId, NodeId, EdgeLabel)],
    ) -> Result<Graph, EngineError> {
        let count = nodes.len();
        let mut graph = Graph {
            nodes,
            outgoing: vec![Vec::new(); count],
            incoming: vec![Vec::new(); count],
        };
        for &(from, to, label) in edges {
            if from as usize >= count {
                return Err(EngineError::NodeNotFound(from));
            }
            if to as usize >= count {
                return Err(EngineError::NodeNotFound(to));
            }
            graph.outgoing[from as usize].push((to, label));
            graph.incoming[to as usize].push((from, label));
        }
        Ok(graph)
    }
}

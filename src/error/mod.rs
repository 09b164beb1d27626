//! Unified error handling for the engine.
//!
//! Consolidates the error types surfaced by the field table, the
//! transformation graph, the migration pipeline, and the engine converter.
//! Validation diagnostics are a separate type ([`crate::validator::ValidationError`])
//! because the validator reports them as a collected list rather than a
//! single failure.

use thiserror::Error;

use crate::fields::FieldId;
use crate::graph::NodeId;

/// Unified error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A live field already occupies the target path
    #[error("Duplicate field: a live field already exists at {path}")]
    DuplicateField { path: String },

    /// An ancestor of the target path exists but cannot own children
    #[error("Invalid parent for {path}: ancestor {ancestor} is a {ancestor_type} field and cannot own children")]
    InvalidParent {
        path: String,
        ancestor: String,
        ancestor_type: String,
    },

    /// A path was malformed for the requested operation
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A rename request violated one of the rename rules
    #[error("Invalid rename of field {field}: {reason}")]
    InvalidRename { field: FieldId, reason: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The transformation request itself was malformed
    #[error("Invalid transformation: {0}")]
    InvalidTransformation(String),

    /// No execution order exists for the graph
    #[error("Cyclic transformation graph: {0}")]
    CyclicGraph(String),

    /// The engine failed structural validation
    #[error("Engine validation failed: {}", .problems.join("; "))]
    Validation { problems: Vec<String> },

    /// Legacy engine conversion failed
    #[error("Engine conversion failed: {0}")]
    Conversion(String),

    /// Template migration failed
    #[error("Template migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! A field transformation engine with DAG-based lineage.
//!
//! Documents are reshaped by an [`Engine`] that tracks every field's history
//! in a directed acyclic graph: where the field came from (organic in the
//! input, or derived by a transformation), how it was renamed, and whether
//! it was removed. The crate ships three cooperating pieces:
//!
//! - the engine itself ([`engine`]), with the editing API, a deterministic
//!   execution planner, and a per-document transformer with partial-failure
//!   reporting;
//! - the structural validator ([`validator`]), which checks the graph and
//!   field invariants and reports diagnostics as a list;
//! - the migration pipeline ([`migration`]), which upgrades templates
//!   serialized under older schema versions, rebuilding legacy flat-map
//!   engines into the DAG representation.
//!
//! ```
//! use datashape::{Engine, FieldType, KeyPath, OperatorRegistry, TransformationSpec};
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! engine.add_field(KeyPath::from_names(["name"]), FieldType::String).unwrap();
//! engine
//!     .append_transformation(TransformationSpec::operator(
//!         "uppercase",
//!         vec![KeyPath::from_names(["name"])],
//!     ))
//!     .unwrap();
//!
//! let registry = OperatorRegistry::with_builtins();
//! let result = engine.transform(json!({"name": "ada"}), &registry).unwrap();
//! assert_eq!(result.document, json!({"name": "ADA"}));
//! ```

pub mod engine;
pub mod error;
pub mod fields;
pub mod graph;
pub mod keypath;
pub mod migration;
pub mod validator;

pub use engine::{
    BatchOutcome, DocumentResult, Engine, NewFieldSpec, NodeError, OperatorContext,
    OperatorError, OperatorRegistry, SerializedEngine, TransformationSpec,
};
pub use error::EngineError;
pub use fields::{Field, FieldId, FieldType};
pub use graph::{EdgeLabel, FieldRef, IdentityRole, NodeId, NodeKind, TransformNode};
pub use keypath::{KeyPath, PathStep, WILDCARD_INDEX};
pub use migration::{
    convert_legacy_engine, update_template_if_needed, LegacyEngine, MigrationOutcome,
    CURRENT_TEMPLATE_VERSION,
};
pub use validator::{verify_engine, verify_field_integrity, verify_graph_integrity, ValidationError};

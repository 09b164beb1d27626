//! Legacy flat-map engine representation (template versions tv4/tv5).
//!
//! Before the DAG re-architecture an engine was a pair of field-name maps
//! plus an ordered step list: `idToPathMap` carries each field's path in
//! the source document, `pathToIdMap` maps the JSON-encoded output path
//! back to the field id, and `steps` reference fields by path. There is no
//! identity-node concept; renames only show up as input/output divergence
//! between the two maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

use crate::keypath::KeyPath;

/// Serialized engine form used before the DAG re-architecture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyEngine {
    /// Forward map: field id -> path in the source document.
    pub id_to_path_map: BTreeMap<String, KeyPath>,
    /// Backward map: JSON-encoded output path -> field id.
    pub path_to_id_map: BTreeMap<String, u32>,
    /// Per-field properties (legacy type information, enabled flag, ...).
    pub field_props: BTreeMap<String, JsonMap<String, JsonValue>>,
    /// Ordered transformation steps.
    pub steps: Vec<LegacyStep>,
}

/// One legacy transformation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyStep {
    pub id: u32,
    #[serde(rename = "type")]
    pub type_code: String,
    #[serde(default)]
    pub fields: Vec<KeyPath>,
    #[serde(default)]
    pub meta: JsonMap<String, JsonValue>,
}

//! Field records and the bidirectional field table.
//!
//! Every field carries a stable integer id that doubles as its index in the
//! table; its current location is a [`KeyPath`]. The table keeps a live
//! path -> id map alongside, so lookups work in both directions. Field
//! records are never deleted: a removed field is marked dead and keeps its
//! last path for diagnostics.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::keypath::KeyPath;

/// Stable identifier of a field. Doubles as the field's index in the table.
pub type FieldId = u32;

/// Resolved type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    GeoPoint,
}

impl FieldType {
    /// Only these types may own child fields.
    pub fn owns_children(self) -> bool {
        matches!(self, FieldType::Array | FieldType::Object | FieldType::GeoPoint)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::GeoPoint => "geo_point",
        }
    }

    /// Maps a legacy type name to its resolved type.
    pub fn from_legacy(name: &str) -> Option<FieldType> {
        match name {
            "string" | "text" | "keyword" => Some(FieldType::String),
            "number" | "long" | "integer" | "short" | "double" | "float" => {
                Some(FieldType::Number)
            }
            "boolean" | "bool" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "array" | "nested" => Some(FieldType::Array),
            "object" => Some(FieldType::Object),
            "geo_point" | "geopoint" => Some(FieldType::GeoPoint),
            _ => None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A single field record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub path: KeyPath,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub properties: JsonMap<String, JsonValue>,
}

/// Bidirectional map between field ids and their current paths.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: Vec<Field>,
    by_path: HashMap<KeyPath, FieldId>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Adds a field at `path`. The path must not belong to a live field, and
    /// every existing ancestor field must be able to own children.
    pub fn insert(
        &mut self,
        path: KeyPath,
        field_type: FieldType,
        properties: JsonMap<String, JsonValue>,
    ) -> Result<FieldId, EngineError> {
        if path.is_empty() {
            return Err(EngineError::InvalidPath {
                path: path.to_string(),
                reason: "path has no steps".to_string(),
            });
        }
        if path.steps().iter().any(|step| step.is_empty_name()) {
            return Err(EngineError::InvalidPath {
                path: path.to_string(),
                reason: "path contains an empty step".to_string(),
            });
        }
        if self.by_path.contains_key(&path) {
            return Err(EngineError::DuplicateField {
                path: path.to_string(),
            });
        }
        self.check_ancestors(&path)?;

        let id = self.fields.len() as FieldId;
        self.by_path.insert(path.clone(), id);
        self.fields.push(Field {
            id,
            path,
            field_type,
            enabled: true,
            dead: false,
            properties,
        });
        Ok(id)
    }

    fn check_ancestors(&self, path: &KeyPath) -> Result<(), EngineError> {
        for prefix in path.strict_prefixes() {
            if let Some(&ancestor_id) = self.by_path.get(&prefix) {
                let ancestor = &self.fields[ancestor_id as usize];
                if !ancestor.field_type.owns_children() {
                    return Err(EngineError::InvalidParent {
                        path: path.to_string(),
                        ancestor: prefix.to_string(),
                        ancestor_type: ancestor.field_type.as_str().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Moves a live field to `new_path`, updating both directions of the
    /// map atomically. Returns `false` when the rename is a no-op (the new
    /// path equals the current one). The field's id never changes.
    pub fn rename(&mut self, id: FieldId, new_path: KeyPath) -> Result<bool, EngineError> {
        let field = self
            .fields
            .get(id as usize)
            .filter(|f| !f.dead)
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;

        if new_path == field.path {
            return Ok(false);
        }

        let fail = |reason: &str| EngineError::InvalidRename {
            field: id,
            reason: reason.to_string(),
        };

        if new_path.is_empty() || new_path.steps().iter().any(|step| step.is_empty_name()) {
            return Err(fail("the new path contains an empty step"));
        }
        if new_path.last().map(|step| step.is_index()).unwrap_or(true) {
            return Err(fail("the new path must end with a name"));
        }
        if let Some(&other) = self.by_path.get(&new_path) {
            if other != id {
                return Err(EngineError::InvalidRename {
                    field: id,
                    reason: format!(
                        "the path {} already resolves to field {}",
                        new_path, other
                    ),
                });
            }
        }
        if !field.path.is_named() {
            return Err(fail("dynamic fields cannot be renamed"));
        }
        if !new_path.is_local_to(&field.path) {
            return Err(fail("a rename may not cross array-nesting levels"));
        }
        for prefix in new_path.strict_prefixes() {
            if let Some(&ancestor_id) = self.by_path.get(&prefix) {
                let ancestor = &self.fields[ancestor_id as usize];
                if !ancestor.field_type.owns_children() {
                    return Err(EngineError::InvalidRename {
                        field: id,
                        reason: format!(
                            "ancestor {} is a {} field and cannot own children",
                            prefix,
                            ancestor.field_type.as_str()
                        ),
                    });
                }
            }
        }

        let old_path = field.path.clone();
        self.by_path.remove(&old_path);
        self.by_path.insert(new_path.clone(), id);
        self.fields[id as usize].path = new_path;
        Ok(true)
    }

    /// Marks a live field dead and frees its path for reuse. The record and
    /// its last path are retained.
    pub fn mark_dead(&mut self, id: FieldId) -> Result<(), EngineError> {
        let field = self
            .fields
            .get_mut(id as usize)
            .filter(|f| !f.dead)
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        let path = field.path.clone();
        field.dead = true;
        self.by_path.remove(&path);
        Ok(())
    }

    pub fn set_enabled(&mut self, id: FieldId, enabled: bool) -> Result<(), EngineError> {
        let field = self
            .fields
            .get_mut(id as usize)
            .filter(|f| !f.dead)
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        field.enabled = enabled;
        Ok(())
    }

    /// Merges `properties` into the field's property map, overwriting
    /// existing keys.
    pub fn merge_properties(
        &mut self,
        id: FieldId,
        properties: JsonMap<String, JsonValue>,
    ) -> Result<(), EngineError> {
        let field = self
            .fields
            .get_mut(id as usize)
            .filter(|f| !f.dead)
            .ok_or_else(|| EngineError::FieldNotFound(id.to_string()))?;
        for (key, value) in properties {
            field.properties.insert(key, value);
        }
        Ok(())
    }

    pub fn get(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id as usize)
    }

    /// Current path of the field, including the last path of dead fields.
    pub fn path_of(&self, id: FieldId) -> Option<&KeyPath> {
        self.fields.get(id as usize).map(|f| &f.path)
    }

    /// Live-field lookup by path.
    pub fn id_at(&self, path: &KeyPath) -> Option<FieldId> {
        self.by_path.get(path).copied()
    }

    pub fn records(&self) -> &[Field] {
        &self.fields
    }

    /// Rebuilds a table from serialized records. Ids must match positions;
    /// live-path collisions are left for the validator to report.
    pub(crate) fn from_records(records: Vec<Field>) -> Result<FieldTable, EngineError> {
        for (index, field) in records.iter().enumerate() {
            if field.id != index as FieldId {
                return Err(EngineError::FieldNotFound(format!(
                    "field {} stored at position {}",
                    field.id, index
                )));
            }
        }
        let mut by_path = HashMap::new();
        for field in records.iter().filter(|f| !f.dead) {
            by_path.entry(field.path.clone()).or_insert(field.id);
        }
        Ok(FieldTable {
            fields: records,
            by_path,
        })
    }
}

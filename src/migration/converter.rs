//! Legacy engine conversion.
//!
//! Rebuilds a DAG engine from the legacy flat-map representation. The
//! converter only ever constructs a fresh engine from an immutable legacy
//! snapshot, so no caller can observe a half-built engine: a conversion
//! either returns a fully validated engine or an error.

use log::{debug, info};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

use crate::engine::{Engine, NewFieldSpec, TransformationSpec};
use crate::error::EngineError;
use crate::fields::{FieldId, FieldType};
use crate::graph::NodeKind;
use crate::keypath::{KeyPath, PathStep};
use crate::validator;

use super::legacy::{LegacyEngine, LegacyStep};

const NEW_FIELD_KEY_PATHS: &str = "newFieldKeyPaths";
const CAST_TYPE: &str = "castType";
const DEPRECATED_CAST: &str = "cast";

/// Raw view of one legacy field before it joins the new engine.
#[derive(Debug, Clone)]
struct RawField {
    old_id: u32,
    input: KeyPath,
    output: KeyPath,
    etl_type: FieldType,
    enabled: bool,
    synthetic: bool,
    properties: JsonMap<String, JsonValue>,
}

/// Rebuilds a DAG engine from `legacy`. Never returns a structurally
/// invalid engine: the result passes full validation or the conversion
/// fails with the collected diagnostics.
pub fn convert_legacy_engine(legacy: &LegacyEngine) -> Result<Engine, EngineError> {
    // reverse lookups for both field-name maps
    let mut input_to_old: HashMap<KeyPath, u32> = HashMap::new();
    let mut old_ids: Vec<(u32, KeyPath)> = Vec::new();
    for (key, path) in &legacy.id_to_path_map {
        let old_id: u32 = key
            .parse()
            .map_err(|_| EngineError::Conversion(format!("non-numeric field id: {key}")))?;
        input_to_old.insert(path.clone(), old_id);
        old_ids.push((old_id, path.clone()));
    }
    old_ids.sort_by_key(|(id, _)| *id);

    let mut old_to_output: HashMap<u32, KeyPath> = HashMap::new();
    for (key, &old_id) in &legacy.path_to_id_map {
        let path: KeyPath = serde_json::from_str(key)
            .map_err(|_| EngineError::Conversion(format!("unparseable path key: {key}")))?;
        old_to_output.insert(old_id, path);
    }

    // raw field records
    let mut raws: Vec<RawField> = Vec::new();
    for (old_id, input) in &old_ids {
        let properties = legacy
            .field_props
            .get(&old_id.to_string())
            .cloned()
            .unwrap_or_default();
        let output = old_to_output
            .get(old_id)
            .cloned()
            .unwrap_or_else(|| input.clone());
        let etl_type = resolve_type(&properties, input);
        let enabled = properties
            .get("enabled")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        raws.push(RawField {
            old_id: *old_id,
            input: input.clone(),
            output,
            etl_type,
            enabled,
            synthetic: false,
            properties,
        });
    }

    classify_synthetic(&mut raws, &legacy.steps);

    // fresh engine, organic fields only, most-ancestral first
    let mut engine = Engine::new();
    let mut organic: Vec<usize> = (0..raws.len()).filter(|&i| !raws[i].synthetic).collect();
    organic.sort_by_key(|&i| raws[i].input.len());
    for &i in &organic {
        engine.add_field(raws[i].input.clone(), raws[i].etl_type)?;
    }

    // old-id <-> new-id cross map, by matching current paths against the
    // legacy forward map
    let by_old: HashMap<u32, usize> = raws.iter().enumerate().map(|(i, r)| (r.old_id, i)).collect();
    let mut new_to_old: HashMap<FieldId, u32> = HashMap::new();
    for id in engine.get_all_field_ids() {
        if let Some(path) = engine.get_field_path(id) {
            if let Some(&old_id) = input_to_old.get(path) {
                new_to_old.insert(id, old_id);
            }
        }
    }

    // rename pass: reconcile input/output divergence through the rename
    // mechanism, ancestors before descendants
    let mut renames: Vec<(usize, FieldId, KeyPath)> = Vec::new();
    for id in engine.get_all_field_ids() {
        let Some(current) = engine.get_field_path(id) else {
            continue;
        };
        let Some(raw) = new_to_old.get(&id).and_then(|old| by_old.get(old)) else {
            continue;
        };
        let output = &raws[*raw].output;
        if current != output {
            renames.push((current.len(), id, output.clone()));
        }
    }
    renames.sort_by_key(|(len, _, _)| *len);
    for (_, id, output) in renames {
        engine.rename_field(id, output)?;
    }

    // transformation pass: replay legacy steps in id order
    let mut steps: Vec<&LegacyStep> = legacy.steps.iter().collect();
    steps.sort_by_key(|step| step.id);
    let output_types: HashMap<&KeyPath, FieldType> =
        raws.iter().map(|r| (&r.output, r.etl_type)).collect();
    for step in steps {
        replay_step(&mut engine, step, &input_to_old, &by_old, &raws, &output_types)?;
    }

    // property transfer pass
    let output_to_raw: HashMap<&KeyPath, usize> =
        raws.iter().enumerate().map(|(i, r)| (&r.output, i)).collect();
    let mut transfers: Vec<(FieldId, usize)> = Vec::new();
    for id in engine.get_all_field_ids() {
        if let Some(path) = engine.get_field_path(id) {
            if let Some(&i) = output_to_raw.get(path) {
                transfers.push((id, i));
            }
        }
    }
    for (id, i) in transfers {
        let raw = &raws[i];
        if raw.enabled {
            engine.enable_field(id)?;
        } else {
            engine.disable_field(id)?;
        }
        let mut properties = raw.properties.clone();
        properties.remove("type");
        properties.remove("valueType");
        properties.remove("etlType");
        properties.insert("type".to_string(), json!(raw.etl_type.as_str()));
        engine.merge_field_properties(id, properties)?;
    }

    // a conversion never hands back an unvalidated engine
    let problems = validator::verify_engine(&engine);
    if !problems.is_empty() {
        return Err(EngineError::Conversion(problems.join("; ")));
    }
    info!(
        "converted legacy engine: {} fields, {} steps",
        raws.len(),
        legacy.steps.len()
    );
    Ok(engine)
}

/// Marks fields derived by a step's `newFieldKeyPaths` as synthetic, then
/// propagates the flag downward: walking a field's output-path prefixes
/// shortest first, the first prefix that resolves to a field decides, and
/// a synthetic ancestor drags the descendant with it.
fn classify_synthetic(raws: &mut [RawField], steps: &[LegacyStep]) {
    let mut derived: Vec<KeyPath> = Vec::new();
    for step in steps {
        if let Some(paths) = step.meta.get(NEW_FIELD_KEY_PATHS) {
            if let Ok(paths) = serde_json::from_value::<Vec<KeyPath>>(paths.clone()) {
                derived.extend(paths);
            }
        }
    }
    for raw in raws.iter_mut() {
        raw.synthetic = derived.contains(&raw.output);
    }

    let mut flags: HashMap<KeyPath, bool> =
        raws.iter().map(|r| (r.output.clone(), r.synthetic)).collect();
    let mut order: Vec<usize> = (0..raws.len()).collect();
    order.sort_by_key(|&i| raws[i].output.len());
    for i in order {
        if raws[i].synthetic {
            continue;
        }
        for prefix in raws[i].output.strict_prefixes() {
            if let Some(&ancestor_synthetic) = flags.get(&prefix) {
                if ancestor_synthetic {
                    raws[i].synthetic = true;
                    flags.insert(raws[i].output.clone(), true);
                }
                break;
            }
        }
    }
}

fn replay_step(
    engine: &mut Engine,
    step: &LegacyStep,
    input_to_old: &HashMap<KeyPath, u32>,
    by_old: &HashMap<u32, usize>,
    raws: &[RawField],
    output_types: &HashMap<&KeyPath, FieldType>,
) -> Result<(), EngineError> {
    let mut inputs = Vec::new();
    for path in &step.fields {
        inputs.push(translate_reference(engine, path, input_to_old, by_old, raws)?);
    }

    let mut params = step.meta.clone();
    let new_paths: Vec<KeyPath> = match params.remove(NEW_FIELD_KEY_PATHS) {
        Some(value) => serde_json::from_value(value)?,
        None => Vec::new(),
    };
    let new_fields: Vec<NewFieldSpec> = new_paths
        .into_iter()
        .map(|path| {
            let field_type = output_types.get(&path).copied().unwrap_or(FieldType::String);
            NewFieldSpec { path, field_type }
        })
        .collect();

    let kind = if step.type_code == DEPRECATED_CAST {
        // legacy cast operators are folded into the deprecated kind; a cast
        // to array needs a wildcard child to land its elements in
        let to_array = params
            .get(CAST_TYPE)
            .and_then(JsonValue::as_str)
            .map(|t| t == "array")
            .unwrap_or(false);
        if to_array {
            if let Some(target) = inputs.first() {
                let wildcard_child = target.join(PathStep::wildcard());
                if engine.get_field_id(&wildcard_child).is_none() {
                    engine.add_inferred_field(wildcard_child)?;
                }
            }
        }
        NodeKind::Deprecated {
            original_type: step.type_code.clone(),
            params,
        }
    } else {
        NodeKind::Operator {
            name: step.type_code.clone(),
            params,
        }
    };

    engine.append_transformation(TransformationSpec {
        kind,
        inputs,
        new_fields,
    })?;
    Ok(())
}

/// Resolves a legacy step's field reference to the new engine's path,
/// synthesizing a field on demand when the reference only ever existed
/// implicitly.
fn translate_reference(
    engine: &mut Engine,
    path: &KeyPath,
    input_to_old: &HashMap<KeyPath, u32>,
    by_old: &HashMap<u32, usize>,
    raws: &[RawField],
) -> Result<KeyPath, EngineError> {
    if let Some(raw) = input_to_old.get(path).and_then(|old| by_old.get(old)) {
        return Ok(raws[*raw].output.clone());
    }
    if engine.get_field_id(path).is_some() {
        return Ok(path.clone());
    }
    if path.is_concrete() {
        engine.add_indexed_field(path.clone(), FieldType::String)?;
    } else {
        engine.add_inferred_field(path.clone())?;
    }
    debug!("synthesized field for dangling reference {path}");
    Ok(path.clone())
}

fn resolve_type(properties: &JsonMap<String, JsonValue>, input: &KeyPath) -> FieldType {
    if let Some(field_type) = properties
        .get("etlType")
        .and_then(JsonValue::as_str)
        .and_then(FieldType::from_legacy)
    {
        return field_type;
    }
    // wildcard-addressed fields describe their elements through the value
    // type, not the element type
    let key = if input.has_wildcard() { "valueType" } else { "type" };
    properties
        .get(key)
        .and_then(JsonValue::as_str)
        .and_then(FieldType::from_legacy)
        .unwrap_or(FieldType::String)
}

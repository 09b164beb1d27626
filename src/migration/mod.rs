//! Template migration.
//!
//! Persisted templates embed serialized engines under `process.edges` and
//! carry a version tag in `meta.version`. [`update_template_if_needed`]
//! upgrades a template through every applicable step until it reaches
//! [`CURRENT_TEMPLATE_VERSION`]; sub-engines are located by structural
//! search, never by a fixed path, so new edge keys need no pipeline
//! changes.

mod converter;
mod legacy;

pub use converter::convert_legacy_engine;
pub use legacy::{LegacyEngine, LegacyStep};

use log::info;
use serde_json::{json, Value as JsonValue};

use crate::error::EngineError;
use crate::keypath::WILDCARD_INDEX;

/// Version stamped on templates produced by this crate.
pub const CURRENT_TEMPLATE_VERSION: &str = "tv5.1";

const TEMPLATE_VERSIONS: [&str; 3] = ["tv4", "tv5", "tv5.1"];
const DEFAULT_TEMPLATE_VERSION: &str = "tv4";

/// Result of [`update_template_if_needed`].
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub template: JsonValue,
    pub updated: bool,
    pub message: String,
}

/// Upgrades `template` to the current version if it is behind.
///
/// Steps run strictly in order; each is skipped when the template's version
/// is already at or beyond its target, and each returns a change counter
/// for diagnostics. After all applicable steps the version tag is stamped.
pub fn update_template_if_needed(template: JsonValue) -> Result<MigrationOutcome, EngineError> {
    if !template.is_object() {
        return Err(EngineError::Migration(
            "template must be a JSON object".to_string(),
        ));
    }
    let mut template = template;
    let version = template_version(&template);
    let rank = version_rank(&version)?;

    if version == CURRENT_TEMPLATE_VERSION {
        return Ok(MigrationOutcome {
            template,
            updated: false,
            message: format!("Template already at {version}"),
        });
    }

    let steps: [(&str, fn(&mut JsonValue) -> Result<usize, EngineError>); 2] = [
        ("tv5", normalize_wildcards),
        ("tv5.1", rebuild_engines),
    ];
    let mut changes = 0usize;
    for (target, step) in steps {
        if rank >= version_rank(target)? {
            continue;
        }
        info!("Upgrading template toward {target}");
        changes += step(&mut template)?;
    }

    if template_version(&template) != CURRENT_TEMPLATE_VERSION {
        stamp_version(&mut template, CURRENT_TEMPLATE_VERSION);
        changes += 1;
    }

    let message =
        format!("Upgraded template from {version} to {CURRENT_TEMPLATE_VERSION} ({changes} changes)");
    info!("{message}");
    Ok(MigrationOutcome {
        template,
        updated: true,
        message,
    })
}

fn version_rank(version: &str) -> Result<usize, EngineError> {
    TEMPLATE_VERSIONS
        .iter()
        .position(|v| *v == version)
        .ok_or_else(|| EngineError::Migration(format!("unknown template version: {version}")))
}

fn template_version(template: &JsonValue) -> String {
    template
        .pointer("/meta/version")
        .and_then(JsonValue::as_str)
        .unwrap_or(DEFAULT_TEMPLATE_VERSION)
        .to_string()
}

fn stamp_version(template: &mut JsonValue, version: &str) {
    let Some(root) = template.as_object_mut() else {
        return;
    };
    let meta = root.entry("meta").or_insert_with(|| json!({}));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("version".to_string(), json!(version));
    }
}

/// Applies `apply` to the value of every `transformations` member found
/// under `process.edges`, wherever it sits.
fn for_each_sub_engine(
    template: &mut JsonValue,
    apply: &mut dyn FnMut(&mut JsonValue) -> Result<usize, EngineError>,
) -> Result<usize, EngineError> {
    let Some(edges) = template.pointer_mut("/process/edges") else {
        return Ok(0);
    };
    visit(edges, apply)
}

fn visit(
    value: &mut JsonValue,
    apply: &mut dyn FnMut(&mut JsonValue) -> Result<usize, EngineError>,
) -> Result<usize, EngineError> {
    let mut changes = 0;
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "transformations" {
                    changes += apply(child)?;
                } else {
                    changes += visit(child, apply)?;
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                changes += visit(item, apply)?;
            }
        }
        _ => {}
    }
    Ok(changes)
}

/// tv4 -> tv5: rewrite `'*'` wildcard markers and numeric string steps in
/// every embedded sub-engine, including the forward/backward field-name
/// maps.
fn normalize_wildcards(template: &mut JsonValue) -> Result<usize, EngineError> {
    for_each_sub_engine(template, &mut |stored| {
        let Some(engine) = stored.as_object_mut() else {
            return Ok(0);
        };
        let mut changes = 0;

        if let Some(steps) = engine.get_mut("steps").and_then(JsonValue::as_array_mut) {
            for step in steps {
                if let Some(fields) = step.pointer_mut("/fields").and_then(JsonValue::as_array_mut)
                {
                    for path in fields {
                        changes += normalize_path(path);
                    }
                }
                if let Some(paths) = step
                    .pointer_mut("/meta/newFieldKeyPaths")
                    .and_then(JsonValue::as_array_mut)
                {
                    for path in paths {
                        changes += normalize_path(path);
                    }
                }
            }
        }

        if let Some(forward) = engine
            .get_mut("idToPathMap")
            .and_then(JsonValue::as_object_mut)
        {
            for (_, path) in forward.iter_mut() {
                changes += normalize_path(path);
            }
        }

        if let Some(backward) = engine
            .get_mut("pathToIdMap")
            .and_then(JsonValue::as_object_mut)
        {
            let entries = std::mem::take(backward);
            for (key, id) in entries {
                let mut path: JsonValue = serde_json::from_str(&key).map_err(|_| {
                    EngineError::Migration(format!("unparseable path key: {key}"))
                })?;
                changes += normalize_path(&mut path);
                let new_key = serde_json::to_string(&path)?;
                backward.insert(new_key, id);
            }
        }

        Ok(changes)
    })
}

/// Rewrites one serialized keypath in place; returns 1 when modified.
fn normalize_path(path: &mut JsonValue) -> usize {
    let Some(steps) = path.as_array_mut() else {
        return 0;
    };
    let mut modified = false;
    for step in steps.iter_mut() {
        if let Some(text) = step.as_str() {
            if text == "*" {
                *step = json!(WILDCARD_INDEX);
                modified = true;
            } else if let Ok(index) = text.parse::<i64>() {
                *step = json!(index);
                modified = true;
            }
        }
    }
    usize::from(modified)
}

/// tv5 -> tv5.1: rebuild every embedded legacy engine as a DAG engine and
/// store the new serialized form in place.
fn rebuild_engines(template: &mut JsonValue) -> Result<usize, EngineError> {
    for_each_sub_engine(template, &mut |stored| {
        let legacy: LegacyEngine = serde_json::from_value(stored.clone())?;
        let engine = convert_legacy_engine(&legacy)?;
        *stored = engine.to_json()?;
        Ok(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_rank_orders_known_versions() {
        assert!(version_rank("tv4").unwrap() < version_rank("tv5").unwrap());
        assert!(version_rank("tv5").unwrap() < version_rank("tv5.1").unwrap());
        assert!(version_rank("tv9").is_err());
    }

    #[test]
    fn test_missing_version_defaults_to_tv4() {
        assert_eq!(template_version(&json!({})), "tv4");
        assert_eq!(
            template_version(&json!({"meta": {"version": "tv5"}})),
            "tv5"
        );
    }

    #[test]
    fn test_structural_search_finds_nested_engines() {
        let mut template = json!({
            "process": {
                "edges": {
                    "a": {"transformations": {"steps": []}},
                    "nested": {"inner": [{"transformations": {"steps": []}}]}
                }
            }
        });
        let mut found = 0;
        for_each_sub_engine(&mut template, &mut |_| {
            found += 1;
            Ok(0)
        })
        .unwrap();
        assert_eq!(found, 2);
    }

    #[test]
    fn test_normalize_path_rewrites_wildcards_and_numeric_strings() {
        let mut path = json!(["items", "*", "price"]);
        assert_eq!(normalize_path(&mut path), 1);
        assert_eq!(path, json!(["items", -1, "price"]));

        let mut path = json!(["items", "0"]);
        assert_eq!(normalize_path(&mut path), 1);
        assert_eq!(path, json!(["items", 0]));

        let mut path = json!(["plain", "name"]);
        assert_eq!(normalize_path(&mut path), 0);
    }
}

use datashape::{
    update_template_if_needed, verify_engine, Engine, EngineError, KeyPath, PathStep,
    CURRENT_TEMPLATE_VERSION,
};
use serde_json::json;

fn tv4_template() -> serde_json::Value {
    json!({
        "meta": {"version": "tv4", "name": "orders"},
        "process": {
            "edges": {
                "edge-1": {
                    "transformations": {
                        "idToPathMap": {
                            "0": ["items"],
                            "1": ["items", "*", "price"],
                            "2": ["total"]
                        },
                        "pathToIdMap": {
                            "[\"items\"]": 0,
                            "[\"items\",\"*\",\"price\"]": 1,
                            "[\"grandTotal\"]": 2
                        },
                        "fieldProps": {
                            "0": {"type": "array"},
                            "1": {"type": "object", "valueType": "number"},
                            "2": {"type": "number", "enabled": false}
                        },
                        "steps": [
                            {"id": 0, "type": "uppercase", "fields": [["sku"]], "meta": {}}
                        ]
                    }
                }
            }
        }
    })
}

#[test]
fn test_tv4_upgrades_to_current_and_validates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let outcome = update_template_if_needed(tv4_template()).unwrap();
    assert!(outcome.updated);
    assert_eq!(
        outcome.template.pointer("/meta/version"),
        Some(&json!(CURRENT_TEMPLATE_VERSION))
    );

    let stored = outcome
        .template
        .pointer("/process/edges/edge-1/transformations")
        .unwrap();
    let engine = Engine::from_json(stored).unwrap();
    assert_eq!(verify_engine(&engine), Vec::<String>::new());

    // wildcard markers became the sentinel index
    let wildcard_price = KeyPath::new(vec![
        PathStep::name("items"),
        PathStep::wildcard(),
        PathStep::name("price"),
    ]);
    assert!(engine.get_field_id(&wildcard_price).is_some());

    // the rename divergence was reconciled through the rename mechanism
    let total = engine
        .get_field_id(&KeyPath::from_names(["grandTotal"]))
        .unwrap();
    assert_eq!(engine.get_field_id(&KeyPath::from_names(["total"])), None);
    assert!(!engine.field(total).unwrap().enabled);

    // the step's dangling reference was synthesized
    assert!(engine.get_field_id(&KeyPath::from_names(["sku"])).is_some());
}

#[test]
fn test_rerunning_migration_is_a_noop() {
    let upgraded = update_template_if_needed(tv4_template()).unwrap().template;
    let again = update_template_if_needed(upgraded.clone()).unwrap();
    assert!(!again.updated);
    assert_eq!(again.template, upgraded);
    assert!(again.message.contains("already"));
}

#[test]
fn test_template_without_engines_is_stamped() {
    let outcome = update_template_if_needed(json!({"meta": {"version": "tv4"}})).unwrap();
    assert!(outcome.updated);
    assert_eq!(
        outcome.template.pointer("/meta/version"),
        Some(&json!("tv5.1"))
    );
}

#[test]
fn test_missing_version_defaults_to_oldest() {
    // a tagless template is treated as tv4 and upgraded all the way
    let outcome = update_template_if_needed(json!({"process": {"edges": {}}})).unwrap();
    assert!(outcome.updated);
    assert_eq!(
        outcome.template.pointer("/meta/version"),
        Some(&json!("tv5.1"))
    );
}

#[test]
fn test_unknown_version_is_rejected() {
    let err = update_template_if_needed(json!({"meta": {"version": "tv9"}})).unwrap_err();
    assert!(matches!(err, EngineError::Migration(_)));
}

#[test]
fn test_non_object_template_is_rejected() {
    let err = update_template_if_needed(json!("not a template")).unwrap_err();
    assert!(matches!(err, EngineError::Migration(_)));
}

#[test]
fn test_engines_are_found_by_structural_search() {
    // an engine under an unusual edge layout is still migrated
    let template = json!({
        "meta": {"version": "tv5"},
        "process": {
            "edges": {
                "group": {
                    "layers": [
                        {"transformations": {
                            "idToPathMap": {"0": ["name"]},
                            "pathToIdMap": {"[\"name\"]": 0},
                            "fieldProps": {"0": {"type": "string"}},
                            "steps": []
                        }}
                    ]
                }
            }
        }
    });
    let outcome = update_template_if_needed(template).unwrap();
    let stored = outcome
        .template
        .pointer("/process/edges/group/layers/0/transformations")
        .unwrap();
    let engine = Engine::from_json(stored).unwrap();
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
    assert!(engine
        .get_field_id(&KeyPath::from_names(["name"]))
        .is_some());
}

#[test]
fn test_migrated_engine_round_trips_through_serializer() {
    let outcome = update_template_if_needed(tv4_template()).unwrap();
    let stored = outcome
        .template
        .pointer("/process/edges/edge-1/transformations")
        .unwrap();
    let engine = Engine::from_json(stored).unwrap();
    let reloaded = Engine::from_json(&engine.to_json().unwrap()).unwrap();
    assert_eq!(verify_engine(&reloaded), Vec::<String>::new());
    assert_eq!(
        reloaded.get_all_field_ids().len(),
        engine.get_all_field_ids().len()
    );
}

use datashape::{
    verify_engine, Engine, EngineError, FieldType, IdentityRole, KeyPath, NodeKind,
    OperatorRegistry, TransformationSpec,
};
use serde_json::{json, Map as JsonMap};

fn names(parts: &[&str]) -> KeyPath {
    KeyPath::from_names(parts.iter().copied())
}

fn role_of(engine: &Engine, field: u32) -> IdentityRole {
    let root = engine.identity_root(field).unwrap();
    match engine.graph().node(root).unwrap().kind {
        NodeKind::Identity { role } => role,
        _ => panic!("identity root is not an identity node"),
    }
}

#[test]
fn test_field_lifecycle_keeps_history() {
    let mut engine = Engine::new();
    let user = engine.add_field(names(&["user"]), FieldType::Object).unwrap();
    let name = engine
        .add_field(names(&["user", "name"]), FieldType::String)
        .unwrap();

    engine
        .rename_field(name, names(&["user", "fullname"]))
        .unwrap();
    assert_eq!(engine.get_field_path(name), Some(&names(&["user", "fullname"])));
    assert_eq!(engine.get_field_id(&names(&["user", "name"])), None);

    engine.remove_field(name).unwrap();
    assert_eq!(engine.get_field_path(name), None);
    assert_eq!(engine.get_field_id(&names(&["user", "fullname"])), None);

    // the dead field's path is free again
    let reborn = engine
        .add_field(names(&["user", "fullname"]), FieldType::String)
        .unwrap();
    assert_ne!(reborn, name);
    assert_eq!(role_of(&engine, user), IdentityRole::Organic);
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

#[test]
fn test_rename_to_current_path_is_noop() {
    let mut engine = Engine::new();
    let id = engine.add_field(names(&["name"]), FieldType::String).unwrap();
    let nodes_before = engine.graph().node_count();
    engine.rename_field(id, names(&["name"])).unwrap();
    assert_eq!(engine.graph().node_count(), nodes_before);
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

#[test]
fn test_rename_onto_live_field_fails() {
    let mut engine = Engine::new();
    let a = engine.add_field(names(&["a"]), FieldType::String).unwrap();
    engine.add_field(names(&["b"]), FieldType::String).unwrap();
    let err = engine.rename_field(a, names(&["b"])).unwrap_err();
    assert!(matches!(err, EngineError::InvalidRename { .. }));
    // nothing changed
    assert_eq!(engine.get_field_path(a), Some(&names(&["a"])));
}

#[test]
fn test_transform_applies_renames_and_removals() {
    let mut engine = Engine::new();
    let name = engine.add_field(names(&["name"]), FieldType::String).unwrap();
    let secret = engine.add_field(names(&["secret"]), FieldType::String).unwrap();
    engine.rename_field(name, names(&["fullname"])).unwrap();
    engine.remove_field(secret).unwrap();
    assert_eq!(verify_engine(&engine), Vec::<String>::new());

    let registry = OperatorRegistry::new();
    let result = engine
        .transform(json!({"name": "ada", "secret": "s3cr3t"}), &registry)
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.document, json!({"fullname": "ada"}));
}

#[test]
fn test_derived_field_via_concat() {
    let mut engine = Engine::new();
    engine.add_field(names(&["first"]), FieldType::String).unwrap();
    engine.add_field(names(&["last"]), FieldType::String).unwrap();

    let mut params = JsonMap::new();
    params.insert("separator".to_string(), json!(" "));
    engine
        .append_transformation(
            TransformationSpec::operator("concat", vec![names(&["first"]), names(&["last"])])
                .with_params(params)
                .with_new_field(names(&["full"]), FieldType::String),
        )
        .unwrap();

    let full = engine.get_field_id(&names(&["full"])).unwrap();
    assert_eq!(role_of(&engine, full), IdentityRole::Synthetic);
    assert_eq!(verify_engine(&engine), Vec::<String>::new());

    let registry = OperatorRegistry::with_builtins();
    let result = engine
        .transform(json!({"first": "Ada", "last": "Lovelace"}), &registry)
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.document["full"], json!("Ada Lovelace"));
}

#[test]
fn test_transform_reports_per_node_errors() {
    let mut engine = Engine::new();
    engine.add_field(names(&["age"]), FieldType::Number).unwrap();
    let node = engine
        .append_transformation(TransformationSpec::operator(
            "uppercase",
            vec![names(&["age"])],
        ))
        .unwrap();

    let registry = OperatorRegistry::with_builtins();
    let result = engine.transform(json!({"age": 41}), &registry).unwrap();
    assert!(!result.is_success());
    assert_eq!(result.node_errors.len(), 1);
    assert_eq!(result.node_errors[0].node, node);
    // the document survives the failing node
    assert_eq!(result.document, json!({"age": 41}));
}

#[test]
fn test_transform_batch_reports_partial_failure() {
    let mut engine = Engine::new();
    engine.add_field(names(&["name"]), FieldType::String).unwrap();
    engine
        .append_transformation(TransformationSpec::operator(
            "uppercase",
            vec![names(&["name"])],
        ))
        .unwrap();

    let registry = OperatorRegistry::with_builtins();
    let outcome = engine
        .transform_batch(
            vec![json!({"name": "ada"}), json!({"name": 7})],
            &registry,
        )
        .unwrap();
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.results[0].document, json!({"name": "ADA"}));
}

#[test]
fn test_unknown_operator_is_a_node_error() {
    let mut engine = Engine::new();
    engine.add_field(names(&["name"]), FieldType::String).unwrap();
    engine
        .append_transformation(TransformationSpec::operator(
            "frobnicate",
            vec![names(&["name"])],
        ))
        .unwrap();
    let registry = OperatorRegistry::with_builtins();
    let result = engine.transform(json!({"name": "ada"}), &registry).unwrap();
    assert_eq!(result.node_errors.len(), 1);
    assert!(result.node_errors[0].message.contains("unknown operator"));
}

#[test]
fn test_append_transformation_requires_live_inputs() {
    let mut engine = Engine::new();
    let err = engine
        .append_transformation(TransformationSpec::operator("uppercase", Vec::new()))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransformation(_)));

    let err = engine
        .append_transformation(TransformationSpec::operator(
            "uppercase",
            vec![names(&["missing"])],
        ))
        .unwrap_err();
    assert!(matches!(err, EngineError::FieldNotFound(_)));
}

#[test]
fn test_execution_order_respects_every_edge() {
    let mut engine = Engine::new();
    let first = engine.add_field(names(&["first"]), FieldType::String).unwrap();
    engine.add_field(names(&["last"]), FieldType::String).unwrap();
    engine
        .append_transformation(
            TransformationSpec::operator("concat", vec![names(&["first"]), names(&["last"])])
                .with_new_field(names(&["full"]), FieldType::String),
        )
        .unwrap();
    engine.rename_field(first, names(&["given"])).unwrap();

    let order = engine.compute_execution_order().unwrap();
    assert_eq!(order.len(), engine.graph().node_count());
    let position = |id: u32| order.iter().position(|n| *n == id).unwrap();
    let mut unique = order.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), order.len());
    for (from, to, _) in engine.graph().edges() {
        assert!(position(from) < position(to), "edge {from} -> {to} out of order");
    }
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

#[test]
fn test_renaming_one_input_of_a_shared_step_stays_valid() {
    // first and last flow through the same concat node; renaming first
    // extends the shared chain and must not corrupt last's lineage
    let mut engine = Engine::new();
    let first = engine.add_field(names(&["first"]), FieldType::String).unwrap();
    engine.add_field(names(&["last"]), FieldType::String).unwrap();
    engine
        .append_transformation(
            TransformationSpec::operator("concat", vec![names(&["first"]), names(&["last"])])
                .with_new_field(names(&["full"]), FieldType::String),
        )
        .unwrap();
    engine.rename_field(first, names(&["given"])).unwrap();
    assert_eq!(verify_engine(&engine), Vec::<String>::new());

    let registry = OperatorRegistry::with_builtins();
    let result = engine
        .transform(json!({"first": "Ada", "last": "Lovelace"}), &registry)
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.document["given"], json!("Ada"));
    assert_eq!(result.document.get("first"), None);
}

#[test]
fn test_removing_one_input_of_a_shared_step_stays_valid() {
    let mut engine = Engine::new();
    let first = engine.add_field(names(&["first"]), FieldType::String).unwrap();
    engine.add_field(names(&["last"]), FieldType::String).unwrap();
    engine
        .append_transformation(
            TransformationSpec::operator("concat", vec![names(&["first"]), names(&["last"])])
                .with_new_field(names(&["full"]), FieldType::String),
        )
        .unwrap();
    engine.remove_field(first).unwrap();
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

#[test]
fn test_apply_edit_rejects_invalid_draft() {
    let mut engine = Engine::new();
    engine.add_field(names(&["a"]), FieldType::Object).unwrap();

    // an orphan nested field leaves the draft disconnected
    let err = engine
        .apply_edit(|draft| {
            draft.add_field(names(&["x", "y"]), FieldType::String)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
    assert_eq!(engine.get_field_id(&names(&["x", "y"])), None);
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

#[test]
fn test_apply_edit_rolls_back_on_closure_error() {
    let mut engine = Engine::new();
    engine.add_field(names(&["a"]), FieldType::Object).unwrap();
    let err = engine
        .apply_edit(|draft| {
            draft.add_field(names(&["b"]), FieldType::String)?;
            Err(EngineError::InvalidTransformation("abort".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransformation(_)));
    assert_eq!(engine.get_field_id(&names(&["b"])), None);
}

#[test]
fn test_apply_edit_commits_valid_batches() {
    let mut engine = Engine::new();
    engine
        .apply_edit(|draft| {
            draft.add_field(names(&["user"]), FieldType::Object)?;
            draft.add_field(names(&["user", "name"]), FieldType::String)?;
            Ok(())
        })
        .unwrap();
    assert!(engine.get_field_id(&names(&["user", "name"])).is_some());
}

#[test]
fn test_enable_disable_round_trip() {
    let mut engine = Engine::new();
    let id = engine.add_field(names(&["name"]), FieldType::String).unwrap();
    engine.disable_field(id).unwrap();
    engine.disable_field(id).unwrap();
    assert!(!engine.field(id).unwrap().enabled);
    engine.enable_field(id).unwrap();
    assert!(engine.field(id).unwrap().enabled);
    // toggling has no structural effect
    assert_eq!(verify_engine(&engine), Vec::<String>::new());
}

//! Integration tests for schema providers and the registry

use std::sync::Arc;

use strata_foundation::{ErrorKind, FieldId, GroupId};
use strata_storage::{
    Cardinality, DataType, EntitySchema, FieldSchema, SchemaProvider, SchemaRegistry,
    StaticSchemaProvider,
};

fn place() -> EntitySchema {
    EntitySchema::builder("Place", FieldSchema::semantic(FieldId::new(0), "place"))
        .group(
            FieldId::new(0),
            GroupId::new(1),
            Cardinality::One,
            FieldSchema::semantic(FieldId::new(1), "label"),
        )
        .field(
            FieldId::new(1),
            FieldSchema::new(FieldId::new(2), "label_text", DataType::String),
        )
        .build()
        .unwrap()
}

#[test]
fn registry_serves_many_types() {
    let person = EntitySchema::builder("Person", FieldSchema::semantic(FieldId::new(0), "person"))
        .build()
        .unwrap();
    let provider = StaticSchemaProvider::new().with(&person).with(&place());
    let mut types: Vec<_> = provider.entity_types().collect();
    types.sort_unstable();
    assert_eq!(types, vec!["Person", "Place"]);

    let registry = SchemaRegistry::new(Arc::new(provider));
    assert_eq!(registry.get("Place").unwrap().entity_type(), "Place");
    assert_eq!(registry.get("Person").unwrap().entity_type(), "Person");
    assert_eq!(registry.cached(), 2);
}

#[test]
fn provider_reports_unknown_types() {
    let provider = StaticSchemaProvider::new();
    assert!(matches!(
        provider.fields("Ghost").unwrap_err().kind,
        ErrorKind::UnknownEntityType(_)
    ));
}

#[test]
fn registry_is_shareable_across_threads() {
    let registry = Arc::new(SchemaRegistry::new(Arc::new(
        StaticSchemaProvider::new().with(&place()),
    )));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.get("Place").unwrap())
        })
        .collect();
    let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
}

#[test]
fn invalid_json_is_a_schema_error() {
    let err = StaticSchemaProvider::from_json("{ not json").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SchemaInvalid(_)));
}

#[test]
fn json_definitions_are_validated_on_first_use() {
    let json = r#"{
        "Broken": {
            "fields": [
                {"id": 0, "alias": "broken", "datatype": "semantic"},
                {"id": 1, "alias": "orphan", "datatype": "string"}
            ]
        }
    }"#;
    let registry = SchemaRegistry::new(Arc::new(StaticSchemaProvider::from_json(json).unwrap()));
    let err = registry.get("Broken").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SchemaInvalid(_)));
    assert_eq!(registry.cached(), 0);
}

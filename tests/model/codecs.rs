//! Tests for the codec registry and the built-in payload forms.

use chrono::NaiveDate;
use strata_foundation::{
    CrossRefId, EntityId, Error, ErrorKind, FieldId, Result, Value, ValueKind,
};
use strata_model::{
    Codec, CodecRegistry, DecodeContext, Decoded, Encoded, LocalizedText, Relationship, TypedValue,
};
use strata_storage::{DataType, FieldSchema};

fn decode(registry: &CodecRegistry, datatype: DataType, raw: &Value) -> Result<Decoded> {
    let field = FieldSchema::new(FieldId::new(1), "f", datatype.clone());
    registry.decode(
        &datatype,
        raw,
        &DecodeContext {
            language: "en",
            field: &field,
        },
    )
}

fn encode(registry: &CodecRegistry, datatype: DataType, value: &TypedValue) -> Result<Encoded> {
    let field = FieldSchema::new(FieldId::new(1), "f", datatype.clone());
    registry.encode(
        &datatype,
        value,
        &DecodeContext {
            language: "en",
            field: &field,
        },
    )
}

/// Whole percentages, stored as integers between 0 and 100.
struct Percent;

impl Codec for Percent {
    fn datatype(&self) -> DataType {
        DataType::Custom("percent".into())
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        match raw {
            Value::Nil => Ok(Decoded::plain(TypedValue::Nil)),
            Value::Int(n) if (0..=100).contains(n) => {
                Ok(Decoded::plain(TypedValue::Number(*n as f64 / 100.0)))
            }
            Value::Int(n) => Err(Error::invalid_value(
                "percent",
                format!("{n} is not a percentage"),
            )),
            other => Err(Error::type_mismatch("percent", other.kind())),
        }
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::Number(n) => Ok(Encoded::plain(Value::Int((n * 100.0).round() as i64))),
            other => Err(Error::invalid_value(
                "percent",
                format!("cannot encode {}", other.type_name()),
            )),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn builtins_dispatch_by_datatype() {
    let registry = CodecRegistry::with_builtins();
    for datatype in [
        DataType::Semantic,
        DataType::String,
        DataType::NonLocalizedString,
        DataType::Number,
        DataType::Boolean,
        DataType::Date,
        DataType::ResourceInstance,
        DataType::ResourceInstanceList,
        DataType::Json,
    ] {
        assert_eq!(registry.get(&datatype).unwrap().datatype(), datatype);
    }
}

#[test]
fn unregistered_tags_are_schema_errors() {
    let registry = CodecRegistry::with_builtins();
    let err = decode(&registry, DataType::Custom("percent".into()), &Value::Int(5)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SchemaInvalid(_)));
}

#[test]
fn custom_codecs_extend_the_builtins() {
    let registry = CodecRegistry::with_builtins().with(Percent);
    let percent = DataType::Custom("percent".into());

    let decoded = decode(&registry, percent.clone(), &Value::Int(25)).unwrap();
    assert_eq!(decoded.value, TypedValue::Number(0.25));
    let encoded = encode(&registry, percent.clone(), &TypedValue::Number(0.4)).unwrap();
    assert_eq!(encoded.raw, Value::Int(40));

    let err = decode(&registry, percent, &Value::Int(140)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidValue { .. }));
    assert!(registry.get(&DataType::String).is_ok());
}

#[test]
fn only_relationship_lists_are_multi_valued() {
    let registry = CodecRegistry::with_builtins().with(Percent);
    assert!(registry.is_multi_valued(&DataType::ResourceInstanceList));
    assert!(!registry.is_multi_valued(&DataType::ResourceInstance));
    assert!(!registry.is_multi_valued(&DataType::Custom("percent".into())));
    assert!(!registry.is_multi_valued(&DataType::Custom("unknown".into())));
}

// =============================================================================
// Scalar Payloads
// =============================================================================

#[test]
fn text_keeps_every_language() {
    let registry = CodecRegistry::with_builtins();
    let raw = Value::object([("en", Value::from("Ash")), ("fr", Value::from("Frêne"))]);
    let decoded = decode(&registry, DataType::String, &raw).unwrap();
    assert_eq!(decoded.value.text("fr"), Some("Frêne"));

    let encoded = encode(&registry, DataType::String, &decoded.value).unwrap();
    assert_eq!(encoded.raw, raw);
}

#[test]
fn text_written_as_a_plain_string_is_tagged() {
    let registry = CodecRegistry::with_builtins();
    let encoded = encode(
        &registry,
        DataType::String,
        &TypedValue::Text(LocalizedText::tagged("en", "Ash")),
    )
    .unwrap();
    assert_eq!(encoded.raw, Value::object([("en", Value::from("Ash"))]));

    let err = decode(&registry, DataType::String, &Value::Int(3)).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::TypeMismatch {
            actual: ValueKind::Int,
            ..
        }
    ));
}

#[test]
fn numbers_accept_numeric_strings() {
    let registry = CodecRegistry::with_builtins();
    let decoded = decode(&registry, DataType::Number, &Value::from(" 42 ")).unwrap();
    assert_eq!(decoded.value, TypedValue::Number(42.0));

    let err = decode(&registry, DataType::Number, &Value::from("forty")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidValue { .. }));
}

#[test]
fn booleans_accept_their_names() {
    let registry = CodecRegistry::with_builtins();
    let decoded = decode(&registry, DataType::Boolean, &Value::from("false")).unwrap();
    assert_eq!(decoded.value, TypedValue::Bool(false));
    assert!(decode(&registry, DataType::Boolean, &Value::from("yes")).is_err());
}

#[test]
fn dates_are_iso_strings() {
    let registry = CodecRegistry::with_builtins();
    let date = NaiveDate::from_ymd_opt(1815, 12, 10).unwrap();
    let encoded = encode(&registry, DataType::Date, &TypedValue::Date(date)).unwrap();
    assert_eq!(encoded.raw, Value::from("1815-12-10"));

    let err = decode(&registry, DataType::Date, &Value::from("10/12/1815")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidValue { .. }));
}

#[test]
fn nil_round_trips_as_a_removed_key() {
    let registry = CodecRegistry::with_builtins();
    for datatype in [DataType::String, DataType::Number, DataType::Date, DataType::Json] {
        let decoded = decode(&registry, datatype.clone(), &Value::Nil).unwrap();
        assert!(decoded.value.is_nil());
        assert!(encode(&registry, datatype, &TypedValue::Nil).unwrap().raw.is_nil());
    }
}

// =============================================================================
// Relationship Payloads
// =============================================================================

#[test]
fn relationships_encode_target_and_cross_reference() {
    let registry = CodecRegistry::with_builtins();
    let rel = Relationship::to(EntityId::new(7), "Person").with_cross_reference(CrossRefId::new(3));
    let encoded = encode(
        &registry,
        DataType::ResourceInstance,
        &TypedValue::Relationship(rel.clone()),
    )
    .unwrap();

    assert_eq!(
        encoded.raw,
        Value::object([
            ("entity", Value::Int(7)),
            ("entity_type", Value::from("Person")),
            ("xref", Value::Int(3)),
        ])
    );
    assert_eq!(encoded.relationships.len(), 1);
    assert_eq!(encoded.relationships[0].slot, 0);
    assert_eq!(encoded.relationships[0].relationship, rel);
}

#[test]
fn relationships_without_a_target_are_invalid() {
    let registry = CodecRegistry::with_builtins();
    let raw = Value::object([("entity_type", Value::from("Person"))]);
    let err = decode(&registry, DataType::ResourceInstance, &raw).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidValue { .. }));
}

#[test]
fn relationship_lists_report_each_slot() {
    let registry = CodecRegistry::with_builtins();
    let rels = vec![
        Relationship::to(EntityId::new(1), "Person"),
        Relationship::to(EntityId::new(2), "Place"),
    ];
    let encoded = encode(
        &registry,
        DataType::ResourceInstanceList,
        &TypedValue::Relationships(rels),
    )
    .unwrap();

    let slots: Vec<_> = encoded.relationships.iter().map(|side| side.slot).collect();
    assert_eq!(slots, [0, 1]);
    let decoded = decode(&registry, DataType::ResourceInstanceList, &encoded.raw).unwrap();
    assert_eq!(decoded.relationships.len(), 2);
    assert_eq!(
        decoded.relationships[1].relationship.target().entity_type().as_ref(),
        "Place"
    );
}

#[test]
fn patching_a_slot_rewrites_only_that_item() {
    let registry = CodecRegistry::with_builtins();
    let codec = registry.get(&DataType::ResourceInstanceList).unwrap();
    let first = Relationship::to(EntityId::new(1), "Person");
    let second = Relationship::to(EntityId::new(2), "Person");
    let raw = encode(
        &registry,
        DataType::ResourceInstanceList,
        &TypedValue::Relationships(vec![first, second.clone()]),
    )
    .unwrap()
    .raw;

    let patched = codec
        .patch_slot(&raw, 1, &second.with_cross_reference(CrossRefId::new(9)))
        .unwrap();
    let items = patched.as_vec().unwrap();
    assert_eq!(items.get(0), raw.as_vec().unwrap().get(0));
    assert_eq!(items.get(1).unwrap().get("xref"), Some(&Value::Int(9)));

    let missing = codec.patch_slot(&raw, 5, &Relationship::to(EntityId::new(3), "Person"));
    assert!(missing.is_err());
}

#[test]
fn scalar_codecs_have_no_slots() {
    let registry = CodecRegistry::with_builtins();
    let codec = registry.get(&DataType::Number).unwrap();
    let err = codec
        .patch_slot(&Value::Int(1), 0, &Relationship::to(EntityId::new(1), "Person"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidValue { .. }));
}

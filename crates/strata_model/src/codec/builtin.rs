//! Built-in codecs.

use std::sync::Arc;

use chrono::NaiveDate;
use strata_foundation::{CrossRefId, EntityId, Error, Result, Value};
use strata_storage::DataType;

use super::{Codec, DecodeContext, Decoded, Encoded, LocalizedText, SideRelationship, TypedValue};
use crate::relation::Relationship;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn cannot_encode(datatype: &DataType, value: &TypedValue) -> Error {
    Error::invalid_value(datatype.tag(), format!("cannot encode {}", value.type_name()))
}

/// Grouping-only fields. They hold no payload, so both directions yield nil.
#[derive(Clone, Copy, Debug, Default)]
pub struct SemanticCodec;

impl Codec for SemanticCodec {
    fn datatype(&self) -> DataType {
        DataType::Semantic
    }

    fn decode(&self, _raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        Ok(Decoded::plain(TypedValue::Nil))
    }

    fn encode(&self, _value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        Ok(Encoded::plain(Value::Nil))
    }
}

/// Localized text, stored as an object from language tag to text.
///
/// An untagged string decodes as text in the context's default language,
/// and a plain string value encodes the same way.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    fn datatype(&self) -> DataType {
        DataType::String
    }

    fn decode(&self, raw: &Value, ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let value = match raw {
            Value::Nil => TypedValue::Nil,
            Value::String(s) => TypedValue::Text(LocalizedText::tagged(ctx.language, s.clone())),
            Value::Map(entries) => {
                let mut text = LocalizedText::new();
                for (language, entry) in entries.iter() {
                    let entry = entry
                        .as_str()
                        .ok_or_else(|| Error::type_mismatch(self.datatype().tag(), entry.kind()))?;
                    text = text.with(language.clone(), entry);
                }
                TypedValue::Text(text)
            }
            other => return Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        };
        Ok(Decoded::plain(value))
    }

    fn encode(&self, value: &TypedValue, ctx: &DecodeContext<'_>) -> Result<Encoded> {
        let raw = match value {
            TypedValue::Nil => Value::Nil,
            TypedValue::Text(text) => Value::object(text.iter().map(|(l, t)| (l, Value::from(t)))),
            TypedValue::String(s) => Value::object([(ctx.language, Value::from(s.clone()))]),
            other => return Err(cannot_encode(&self.datatype(), other)),
        };
        Ok(Encoded::plain(raw))
    }
}

/// Text with no language tagging.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainStringCodec;

impl Codec for PlainStringCodec {
    fn datatype(&self) -> DataType {
        DataType::NonLocalizedString
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        match raw {
            Value::Nil => Ok(Decoded::plain(TypedValue::Nil)),
            Value::String(s) => Ok(Decoded::plain(TypedValue::String(s.clone()))),
            other => Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        }
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::String(s) => Ok(Encoded::plain(Value::from(s.clone()))),
            other => Err(cannot_encode(&self.datatype(), other)),
        }
    }
}

/// Numbers. Integral values within the exactly representable range are
/// stored as integers, everything else as floats. Numeric strings decode.
#[derive(Clone, Copy, Debug, Default)]
pub struct NumberCodec;

// 2^53: beyond this not every integer has an exact f64.
const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

impl Codec for NumberCodec {
    fn datatype(&self) -> DataType {
        DataType::Number
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let value = match raw {
            Value::Nil => TypedValue::Nil,
            Value::Int(_) | Value::Float(_) => {
                TypedValue::Number(raw.as_number().unwrap_or_default())
            }
            Value::String(s) => TypedValue::Number(s.trim().parse().map_err(|_| {
                Error::invalid_value(self.datatype().tag(), format!("not a number: {s:?}"))
            })?),
            other => return Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        };
        Ok(Decoded::plain(value))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        let raw = match value {
            TypedValue::Nil => Value::Nil,
            TypedValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_EXACT => {
                Value::Int(*n as i64)
            }
            TypedValue::Number(n) => Value::Float(*n),
            other => return Err(cannot_encode(&self.datatype(), other)),
        };
        Ok(Encoded::plain(raw))
    }
}

/// Booleans. The strings `"true"` and `"false"` also decode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BooleanCodec;

impl Codec for BooleanCodec {
    fn datatype(&self) -> DataType {
        DataType::Boolean
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let value = match raw {
            Value::Nil => TypedValue::Nil,
            Value::Bool(b) => TypedValue::Bool(*b),
            Value::String(s) => match s.as_ref() {
                "true" => TypedValue::Bool(true),
                "false" => TypedValue::Bool(false),
                _ => {
                    return Err(Error::invalid_value(
                        self.datatype().tag(),
                        format!("not a boolean: {s:?}"),
                    ));
                }
            },
            other => return Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        };
        Ok(Decoded::plain(value))
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::Bool(b) => Ok(Encoded::plain(Value::Bool(*b))),
            other => Err(cannot_encode(&self.datatype(), other)),
        }
    }
}

/// Calendar dates, stored as ISO-8601 `YYYY-MM-DD` strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateCodec;

impl Codec for DateCodec {
    fn datatype(&self) -> DataType {
        DataType::Date
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        match raw {
            Value::Nil => Ok(Decoded::plain(TypedValue::Nil)),
            Value::String(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(|date| Decoded::plain(TypedValue::Date(date)))
                .map_err(|e| Error::invalid_value(self.datatype().tag(), format!("{s:?}: {e}"))),
            other => Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        }
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::Date(date) => Ok(Encoded::plain(Value::from(
                date.format(DATE_FORMAT).to_string(),
            ))),
            other => Err(cannot_encode(&self.datatype(), other)),
        }
    }
}

fn raw_id(datatype: &DataType, raw: u64) -> Result<Value> {
    i64::try_from(raw)
        .map(Value::Int)
        .map_err(|_| Error::invalid_value(datatype.tag(), format!("id {raw} out of range")))
}

fn parse_id(datatype: &DataType, raw: &Value, key: &str) -> Result<Option<u64>> {
    match raw.get(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::Int(n)) => u64::try_from(*n)
            .map(Some)
            .map_err(|_| Error::invalid_value(datatype.tag(), format!("negative {key} {n}"))),
        Some(other) => Err(Error::type_mismatch(datatype.tag(), other.kind())),
    }
}

/// Decodes `{"entity": id, "entity_type": name, "xref": id}`.
fn decode_reference(datatype: &DataType, raw: &Value) -> Result<Relationship> {
    if raw.as_map().is_none() {
        return Err(Error::type_mismatch(datatype.tag(), raw.kind()));
    }
    let entity_type: Arc<str> = raw
        .get("entity_type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_value(datatype.tag(), "reference without entity_type"))?
        .into();
    let entity = parse_id(datatype, raw, "entity")?
        .ok_or_else(|| Error::invalid_value(datatype.tag(), "reference without target entity"))?;
    let relationship = Relationship::to(EntityId::new(entity), entity_type);
    Ok(match parse_id(datatype, raw, "xref")? {
        Some(xref) => relationship.with_cross_reference(CrossRefId::new(xref)),
        None => relationship,
    })
}

fn encode_reference(datatype: &DataType, relationship: &Relationship) -> Result<Value> {
    let target = relationship.target();
    let entity = match target.id() {
        Some(id) => raw_id(datatype, id.get())?,
        None => Value::Nil,
    };
    let xref = match relationship.cross_reference() {
        Some(id) => raw_id(datatype, id.get())?,
        None => Value::Nil,
    };
    Ok(Value::object([
        ("entity", entity),
        ("entity_type", Value::from(target.entity_type().clone())),
        ("xref", xref),
    ]))
}

fn side(relationships: &[Relationship]) -> Vec<SideRelationship> {
    relationships
        .iter()
        .enumerate()
        .map(|(slot, relationship)| SideRelationship {
            slot,
            relationship: relationship.clone(),
        })
        .collect()
}

/// A reference to one entity.
///
/// Accepts a one-element list on decode, as written by list-valued fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelationshipCodec;

impl Codec for RelationshipCodec {
    fn datatype(&self) -> DataType {
        DataType::ResourceInstance
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let raw = match raw {
            Value::Nil => return Ok(Decoded::plain(TypedValue::Nil)),
            Value::Vec(items) if items.len() == 1 => items.get(0).unwrap_or(raw),
            other => other,
        };
        let relationship = decode_reference(&self.datatype(), raw)?;
        Ok(Decoded {
            relationships: side(std::slice::from_ref(&relationship)),
            value: TypedValue::Relationship(relationship),
        })
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::Relationship(relationship) => Ok(Encoded {
                raw: encode_reference(&self.datatype(), relationship)?,
                relationships: side(std::slice::from_ref(relationship)),
            }),
            other => Err(cannot_encode(&self.datatype(), other)),
        }
    }

    fn patch_slot(&self, _raw: &Value, slot: usize, relationship: &Relationship) -> Result<Value> {
        if slot != 0 {
            return Err(Error::invalid_value(
                self.datatype().tag(),
                format!("no relationship slot {slot}"),
            ));
        }
        encode_reference(&self.datatype(), relationship)
    }
}

/// References to several entities, stored as a list.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelationshipListCodec;

impl Codec for RelationshipListCodec {
    fn datatype(&self) -> DataType {
        DataType::ResourceInstanceList
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        let items = match raw {
            Value::Nil => return Ok(Decoded::plain(TypedValue::Nil)),
            Value::Vec(items) => items,
            other => return Err(Error::type_mismatch(self.datatype().tag(), other.kind())),
        };
        let relationships = items
            .iter()
            .map(|item| decode_reference(&self.datatype(), item))
            .collect::<Result<Vec<_>>>()?;
        Ok(Decoded {
            relationships: side(&relationships),
            value: TypedValue::Relationships(relationships),
        })
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        let relationships = match value {
            TypedValue::Nil => return Ok(Encoded::plain(Value::Nil)),
            TypedValue::Relationships(list) => list.as_slice(),
            TypedValue::Relationship(one) => std::slice::from_ref(one),
            other => return Err(cannot_encode(&self.datatype(), other)),
        };
        let raw = relationships
            .iter()
            .map(|rel| encode_reference(&self.datatype(), rel))
            .collect::<Result<Vec<_>>>()?;
        Ok(Encoded {
            raw: Value::list(raw),
            relationships: side(relationships),
        })
    }

    fn is_multi_valued(&self) -> bool {
        true
    }

    fn patch_slot(&self, raw: &Value, slot: usize, relationship: &Relationship) -> Result<Value> {
        let items = raw
            .as_vec()
            .ok_or_else(|| Error::type_mismatch(self.datatype().tag(), raw.kind()))?;
        let patched = encode_reference(&self.datatype(), relationship)?;
        items.update(slot, patched).map(Value::Vec).ok_or_else(|| {
            Error::invalid_value(self.datatype().tag(), format!("no relationship slot {slot}"))
        })
    }
}

/// Arbitrary payload, passed through undecoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn datatype(&self) -> DataType {
        DataType::Json
    }

    fn decode(&self, raw: &Value, _ctx: &DecodeContext<'_>) -> Result<Decoded> {
        Ok(Decoded::plain(match raw {
            Value::Nil => TypedValue::Nil,
            other => TypedValue::Json(other.clone()),
        }))
    }

    fn encode(&self, value: &TypedValue, _ctx: &DecodeContext<'_>) -> Result<Encoded> {
        match value {
            TypedValue::Nil => Ok(Encoded::plain(Value::Nil)),
            TypedValue::Json(raw) => Ok(Encoded::plain(raw.clone())),
            other => Err(cannot_encode(&self.datatype(), other)),
        }
    }
}

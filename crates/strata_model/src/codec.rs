//! Codecs: per-datatype conversion between payload values and typed values.
//!
//! A codec decodes the raw [`Value`] stored under a field id into a
//! [`TypedValue`], and encodes it back. Relationship-valued codecs also
//! report the relationships they saw, so the engine can resolve them
//! without knowing anything about the datatype.

mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use strata_foundation::{Error, Result, Value};
use strata_storage::{DataType, FieldSchema};

use crate::relation::Relationship;

pub use builtin::{
    BooleanCodec, DateCodec, JsonCodec, NumberCodec, PlainStringCodec, RelationshipCodec,
    RelationshipListCodec, SemanticCodec, StringCodec,
};

/// Text in one or more languages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocalizedText(BTreeMap<Arc<str>, Arc<str>>);

impl LocalizedText {
    /// Creates empty text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates text in a single language.
    #[must_use]
    pub fn tagged(language: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        Self::new().with(language, text)
    }

    /// Adds or replaces the text for a language.
    #[must_use]
    pub fn with(mut self, language: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        self.0.insert(language.into(), text.into());
        self
    }

    /// Returns the text for a language.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(AsRef::as_ref)
    }

    /// Returns true if no language has text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(language, text)` pairs in language order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    /// No value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// Localized text.
    Text(LocalizedText),
    /// Text with no language.
    String(Arc<str>),
    /// Calendar date.
    Date(NaiveDate),
    /// Reference to one entity.
    Relationship(Relationship),
    /// References to several entities, in order.
    Relationships(Vec<Relationship>),
    /// Undecoded payload.
    Json(Value),
}

impl TypedValue {
    /// Returns true if this value is nil.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns true if this value is truthy.
    ///
    /// Nil, false, empty text and empty lists are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil | Self::Bool(false) => false,
            Self::Text(text) => !text.is_empty(),
            Self::String(s) => !s.is_empty(),
            Self::Relationships(list) => !list.is_empty(),
            Self::Json(value) => value.is_truthy(),
            _ => true,
        }
    }

    /// Returns a short name for the variant, used in errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Relationship(_) => "relationship",
            Self::Relationships(_) => "relationship list",
            Self::Json(_) => "json",
        }
    }

    /// Returns the text for a language, for text and plain string values.
    #[must_use]
    pub fn text(&self, language: &str) -> Option<&str> {
        match self {
            Self::Text(text) => text.get(language),
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number, if this is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the relationship, if this is a single relationship.
    #[must_use]
    pub const fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Self::Relationship(rel) => Some(rel),
            _ => None,
        }
    }

    /// Returns true for relationship-valued variants.
    #[must_use]
    pub const fn is_relationship(&self) -> bool {
        matches!(self, Self::Relationship(_) | Self::Relationships(_))
    }
}

impl From<bool> for TypedValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for TypedValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<LocalizedText> for TypedValue {
    fn from(text: LocalizedText) -> Self {
        Self::Text(text)
    }
}

impl From<NaiveDate> for TypedValue {
    fn from(date: NaiveDate) -> Self {
        Self::Date(date)
    }
}

impl From<Relationship> for TypedValue {
    fn from(rel: Relationship) -> Self {
        Self::Relationship(rel)
    }
}

impl From<Vec<Relationship>> for TypedValue {
    fn from(rels: Vec<Relationship>) -> Self {
        Self::Relationships(rels)
    }
}

/// A relationship found while decoding or encoding, with its position.
///
/// `slot` is the index within a list-valued payload, or 0.
#[derive(Clone, Debug, PartialEq)]
pub struct SideRelationship {
    /// Position within the field's payload.
    pub slot: usize,
    /// The relationship.
    pub relationship: Relationship,
}

/// Context handed to codecs.
#[derive(Clone, Copy, Debug)]
pub struct DecodeContext<'a> {
    /// Language applied to untagged text.
    pub language: &'a str,
    /// The field being decoded or encoded.
    pub field: &'a FieldSchema,
}

/// Result of [`Codec::decode`].
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    /// The typed value.
    pub value: TypedValue,
    /// Relationships contained in the value.
    pub relationships: Vec<SideRelationship>,
}

impl Decoded {
    /// A decoded value with no relationships.
    #[must_use]
    pub fn plain(value: TypedValue) -> Self {
        Self {
            value,
            relationships: Vec::new(),
        }
    }
}

/// Result of [`Codec::encode`].
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    /// The payload value. `Value::Nil` means the key is removed.
    pub raw: Value,
    /// Relationships contained in the value.
    pub relationships: Vec<SideRelationship>,
}

impl Encoded {
    /// An encoded value with no relationships.
    #[must_use]
    pub fn plain(raw: Value) -> Self {
        Self {
            raw,
            relationships: Vec::new(),
        }
    }
}

/// Conversion between a datatype's payload form and its typed form.
///
/// `decode(encode(x))` must equal `x` up to normalization documented by the
/// codec.
pub trait Codec: Send + Sync {
    /// The datatype this codec handles.
    fn datatype(&self) -> DataType;

    /// Decodes a payload value. `Value::Nil` decodes to `TypedValue::Nil`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` or `InvalidValue` for malformed input.
    fn decode(&self, raw: &Value, ctx: &DecodeContext<'_>) -> Result<Decoded>;

    /// Encodes a typed value. `TypedValue::Nil` encodes to `Value::Nil`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the value has the wrong type.
    fn encode(&self, value: &TypedValue, ctx: &DecodeContext<'_>) -> Result<Encoded>;

    /// Returns true if the payload stores a list even for a single field.
    fn is_multi_valued(&self) -> bool {
        false
    }

    /// Rewrites the relationship at `slot` of an encoded payload value.
    ///
    /// # Errors
    ///
    /// The default implementation fails: only relationship codecs hold slots.
    fn patch_slot(&self, raw: &Value, slot: usize, relationship: &Relationship) -> Result<Value> {
        let _ = (raw, relationship);
        Err(Error::invalid_value(
            self.datatype().tag(),
            format!("no relationship slot {slot}"),
        ))
    }
}

/// Dispatch table from datatype to codec.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<DataType, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in codec.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with(SemanticCodec)
            .with(StringCodec)
            .with(PlainStringCodec)
            .with(NumberCodec)
            .with(BooleanCodec)
            .with(DateCodec)
            .with(RelationshipCodec)
            .with(RelationshipListCodec)
            .with(JsonCodec)
    }

    /// Registers a codec under its datatype, replacing any previous one.
    pub fn register(&mut self, codec: impl Codec + 'static) {
        self.codecs.insert(codec.datatype(), Arc::new(codec));
    }

    /// Registers a codec, builder style.
    #[must_use]
    pub fn with(mut self, codec: impl Codec + 'static) -> Self {
        self.register(codec);
        self
    }

    /// Returns the codec for a datatype.
    ///
    /// # Errors
    ///
    /// Returns `SchemaInvalid` if no codec handles the datatype.
    pub fn get(&self, datatype: &DataType) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(datatype)
            .cloned()
            .ok_or_else(|| Error::schema_invalid(format!("no codec for datatype {datatype}")))
    }

    /// Decodes through the codec for `datatype`.
    ///
    /// # Errors
    ///
    /// Returns an error if no codec is registered or decoding fails.
    pub fn decode(
        &self,
        datatype: &DataType,
        raw: &Value,
        ctx: &DecodeContext<'_>,
    ) -> Result<Decoded> {
        self.get(datatype)?.decode(raw, ctx)
    }

    /// Encodes through the codec for `datatype`.
    ///
    /// # Errors
    ///
    /// Returns an error if no codec is registered or encoding fails.
    pub fn encode(
        &self,
        datatype: &DataType,
        value: &TypedValue,
        ctx: &DecodeContext<'_>,
    ) -> Result<Encoded> {
        self.get(datatype)?.encode(value, ctx)
    }

    /// Returns true if fields of `datatype` store lists.
    #[must_use]
    pub fn is_multi_valued(&self, datatype: &DataType) -> bool {
        self.codecs
            .get(datatype)
            .is_some_and(|codec| codec.is_multi_valued())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.codecs.keys().map(DataType::tag).collect();
        tags.sort_unstable();
        f.debug_struct("CodecRegistry").field("datatypes", &tags).finish()
    }
}

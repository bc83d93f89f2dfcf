use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::math::{self, QuantizedVector};

/// Who produced a piece of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!(
                "unknown role '{other}', expected one of: system, user, assistant"
            )),
        }
    }
}

/// Wire names of the typed [`Metadata`] fields
const TYPED_FIELDS: &[&str] = &[
    "role",
    "conversationId",
    "category",
    "isChunk",
    "chunkIndex",
    "chunkTotal",
    "originalTextLength",
];

/// Metadata attached to an embedding record
///
/// The conventional keys are typed fields; anything else lands in `extra`. On the wire
/// every field is a top-level camelCase key, so `extra` never shadows a known field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_chunk: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text_length: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[inline]
    pub fn with_conversation<S: Into<String>>(mut self, id: S) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = Some(category.into());
        self
    }

    #[inline]
    pub fn with_extra<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Every present field as a `(name, value)` pair, in key order
    #[inline]
    pub fn fields(&self) -> Vec<(String, Value)> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Move `extra` entries named after a typed field into that field.
    ///
    /// A typed field that is already set keeps its value. Fails when a moved entry does
    /// not have the field's type, e.g. `conversationId = 42`.
    pub(crate) fn normalized(mut self) -> Result<Self, serde_json::Error> {
        let shadowing: Vec<String> = self
            .extra
            .keys()
            .filter(|key| TYPED_FIELDS.contains(&key.as_str()))
            .cloned()
            .collect();
        if shadowing.is_empty() {
            return Ok(self);
        }

        let mut merged = serde_json::Map::new();
        for key in shadowing {
            if let Some(value) = self.extra.remove(&key) {
                merged.insert(key, value);
            }
        }
        if let Value::Object(current) = serde_json::to_value(&self)? {
            merged.extend(current);
        }
        serde_json::from_value(Value::Object(merged))
    }

    #[inline]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields()
            .into_iter()
            .find_map(|(name, value)| (name == field).then_some(value))
    }
}

/// Equality constraints on metadata fields; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    fields: BTreeMap<String, Value>,
}

impl MetadataFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn field<K: Into<String>>(mut self, name: K, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    #[inline]
    pub fn role(self, role: Role) -> Self {
        self.field("role", Value::String(role.as_str().to_string()))
    }

    #[inline]
    pub fn conversation<S: Into<String>>(self, id: S) -> Self {
        self.field("conversationId", Value::String(id.into()))
    }

    #[inline]
    pub fn category<S: Into<String>>(self, category: S) -> Self {
        self.field("category", Value::String(category.into()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    #[inline]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        if self.fields.is_empty() {
            return true;
        }
        let present = metadata.fields();
        self.fields.iter().all(|(name, expected)| {
            present
                .iter()
                .any(|(field, value)| field == name && values_equal(value, expected))
        })
    }
}

/// Equal after canonicalization, so `1` and `1.0` or differently ordered objects agree
fn values_equal(a: &Value, b: &Value) -> bool {
    super::index::canonical_json(a) == super::index::canonical_json(b)
}

/// A persisted embedding as handed to callers
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub metadata: Metadata,
}

/// An embedding that has not been stored yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl NewEmbedding {
    #[inline]
    pub fn new<S: Into<String>>(text: S, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
            metadata: Metadata::default(),
        }
    }

    #[inline]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredVector {
    Raw(Vec<f32>),
    Quantized(QuantizedVector),
}

impl StoredVector {
    pub(crate) fn encode(vector: &[f32], compress: bool) -> Self {
        if compress {
            Self::Quantized(math::quantize(vector))
        } else {
            Self::Raw(vector.to_vec())
        }
    }

    pub(crate) fn decode(&self) -> Vec<f32> {
        match self {
            Self::Raw(values) => values.clone(),
            Self::Quantized(q) => math::dequantize(q),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Raw(values) => values.len(),
            Self::Quantized(q) => q.values.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The on-disk form of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub id: String,
    pub text: String,
    pub vector: StoredVector,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StoredRecord {
    pub(crate) fn into_record(self) -> EmbeddingRecord {
        EmbeddingRecord {
            vector: self.vector.decode(),
            id: self.id,
            text: self.text,
            timestamp: self.timestamp,
            metadata: self.metadata,
        }
    }
}

//! Payload codec.
//!
//! Converts structured (JSON) payloads to the storage-native BSON form and
//! back. Document stores treat field names starting with `$` as operators,
//! so the codec swaps that marker for a substitute character on the way in
//! and restores it on the way out. Renamed fields are moved to the front of
//! their object, since type discriminators such as `$type` must come first
//! for some deserializers.

use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

/// Field-name prefix the storage engine reserves.
pub const RESERVED_MARKER: char = '$';

/// Default replacement for [`RESERVED_MARKER`] (FULLWIDTH DOLLAR SIGN).
pub const DEFAULT_SUBSTITUTE: char = '\u{FF04}';

/// Errors raised while converting payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed structured payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Number cannot be represented in a document: {0}")]
    Unrepresentable(String),

    /// A field name already uses the substitute, or two names map to the
    /// same stored name.
    #[error("Field name collides after marker substitution: {0}")]
    KeyCollision(String),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Reversible JSON <-> BSON payload codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    substitute: char,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self {
            substitute: DEFAULT_SUBSTITUTE,
        }
    }
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec using `substitute` in place of the reserved marker.
    ///
    /// Returns `None` if `substitute` is the marker itself.
    pub fn with_substitute(substitute: char) -> Option<Self> {
        (substitute != RESERVED_MARKER).then_some(Self { substitute })
    }

    pub fn substitute(&self) -> char {
        self.substitute
    }

    /// Parse `bytes` as JSON and produce the native document.
    pub fn encode(&self, bytes: &[u8]) -> Result<Bson> {
        let value: Value = serde_json::from_slice(bytes).map_err(CodecError::Malformed)?;
        let escaped = escape(value, self.substitute)?;
        to_bson(escaped)
    }

    /// Render a native document back to JSON bytes.
    pub fn decode(&self, native: &Bson) -> Result<Vec<u8>> {
        let value = unescape(from_bson(native), self.substitute)?;
        serde_json::to_vec(&value).map_err(CodecError::Serialize)
    }
}

/// Rename `$`-prefixed fields and hoist them to the front of their object.
///
/// A field that already starts with `substitute` would come back as a
/// `$` field on decode, so it is rejected.
fn escape(value: Value, substitute: char) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut hoisted = Vec::new();
            let mut rest = Vec::new();
            for (key, child) in map {
                if key.starts_with(substitute) {
                    return Err(CodecError::KeyCollision(key));
                }
                let child = escape(child, substitute)?;
                match key.strip_prefix(RESERVED_MARKER) {
                    Some(name) => hoisted.push((format!("{substitute}{name}"), child)),
                    None => rest.push((key, child)),
                }
            }
            collect_object(hoisted.into_iter().chain(rest))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| escape(item, substitute))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar),
    }
}

/// Inverse of [`escape`]; field positions are left as stored.
fn unescape(value: Value, substitute: char) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (key, child) in map {
                let child = unescape(child, substitute)?;
                let key = match key.strip_prefix(substitute) {
                    Some(name) => format!("{RESERVED_MARKER}{name}"),
                    None => key,
                };
                fields.push((key, child));
            }
            collect_object(fields)
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| unescape(item, substitute))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar),
    }
}

fn collect_object(fields: impl IntoIterator<Item = (String, Value)>) -> Result<Value> {
    let mut object = Map::new();
    for (key, value) in fields {
        if object.contains_key(&key) {
            return Err(CodecError::KeyCollision(key));
        }
        object.insert(key, value);
    }
    Ok(Value::Object(object))
}

fn to_bson(value: Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(n) => number_to_bson(&n)?,
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(to_bson)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (key, child) in map {
                doc.insert(key, to_bson(child)?);
            }
            Bson::Document(doc)
        }
    })
}

fn number_to_bson(n: &Number) -> Result<Bson> {
    if let Some(i) = n.as_i64() {
        return Ok(i32::try_from(i).map(Bson::Int32).unwrap_or(Bson::Int64(i)));
    }
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            return Ok(Bson::Double(f));
        }
    }
    Err(CodecError::Unrepresentable(n.to_string()))
}

fn from_bson(bson: &Bson) -> Value {
    match bson {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => bson.clone().into_relaxed_extjson(),
        },
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(from_bson).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(key, child)| (key.clone(), from_bson(child)))
                .collect(),
        ),
        // Values no JSON payload produces; written by other tools.
        other => other.clone().into_relaxed_extjson(),
    }
}

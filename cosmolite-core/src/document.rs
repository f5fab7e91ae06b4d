// src/document.rs
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::error::{Result, CosmoLiteError};

/// Property names owned by the store. User bodies cannot write them directly.
pub const SYSTEM_FIELDS: [&str; 5] = ["id", "_self", "_etag", "_ts", "_rid"];

pub fn is_system_field(field: &str) -> bool {
    SYSTEM_FIELDS.contains(&field)
}

/// A stored document: system properties plus an insertion-ordered field map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    /// Opaque link addressing this document inside its collection
    #[serde(rename = "_self", default)]
    pub self_link: String,

    /// Version token, regenerated on every write
    #[serde(rename = "_etag", default)]
    pub etag: String,

    /// Unix seconds of the last write
    #[serde(rename = "_ts", default)]
    pub ts: i64,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Unstored document (empty `_self` / `_etag`)
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Document {
            id: id.into(),
            self_link: String::new(),
            etag: String::new(),
            ts: 0,
            fields,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(ref map) => match map.get("id") {
                Some(Value::String(_)) => Ok(serde_json::from_value(value)?),
                Some(_) => Err(CosmoLiteError::Validation("document id must be a string".into())),
                None => Err(CosmoLiteError::Validation("document has no id".into())),
            },
            _ => Err(CosmoLiteError::Validation("document must be a JSON object".into())),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.clone())
    }

    /// User field lookup; system properties are exposed as struct fields
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    pub fn set(&mut self, field: String, value: Value) {
        self.fields.insert(field, value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Split a create body into its requested id and its user fields.
    /// Store-owned properties other than `id` are dropped.
    pub(crate) fn split_body(body: Value) -> Result<(Option<String>, Map<String, Value>)> {
        let Value::Object(mut map) = body else {
            return Err(CosmoLiteError::Validation("document body must be a JSON object".into()));
        };

        let id = match map.shift_remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => {
                return Err(CosmoLiteError::Validation("document id must not be empty".into()));
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                return Err(CosmoLiteError::Validation("document id must be a string".into()));
            }
        };

        map.retain(|key, _| !is_system_field(key));
        Ok((id, map))
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        let mut map = Map::new();

        map.insert("id".to_string(), Value::String(doc.id));
        for (k, v) in doc.fields {
            map.insert(k, v);
        }
        map.insert("_self".to_string(), Value::String(doc.self_link));
        map.insert("_etag".to_string(), Value::String(doc.etag));
        map.insert("_ts".to_string(), Value::from(doc.ts));

        Value::Object(map)
    }
}

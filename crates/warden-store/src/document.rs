//! Documents and write operations.

use crate::error::{Result, StoreError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Field map of a document.
pub type Fields = serde_json::Map<String, Value>;

/// A document read from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its collection.
    pub id: String,
    /// Document body.
    pub fields: Fields,
}

impl Document {
    /// Create a document from raw fields.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode the document body into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// Encode a typed record into a field map.
///
/// Fails if the record does not serialize to a JSON object.
pub fn to_fields<T: Serialize>(record: &T) -> Result<Fields> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// A single write, used to batch writes into one atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite a document, optionally merging into existing fields.
    Set {
        /// Collection path.
        collection: String,
        /// Document id.
        id: String,
        /// Fields to write.
        fields: Fields,
        /// Merge into existing fields instead of replacing them.
        merge: bool,
    },
    /// Merge fields into an existing document.
    Update {
        /// Collection path.
        collection: String,
        /// Document id.
        id: String,
        /// Fields to merge.
        fields: Fields,
    },
    /// Delete a document if present.
    Delete {
        /// Collection path.
        collection: String,
        /// Document id.
        id: String,
    },
}

impl WriteOp {
    /// Collection the write targets.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// Document id the write targets.
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Update { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

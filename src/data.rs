//! Typed records decoded from raw store documents.
//!
//! Decoding happens once at the scan/lookup boundary. Classification only ever
//! sees these types, so an absent or wrong-typed relating field is an explicit
//! [`LinkRef`] state instead of a null check buried in rule logic.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CollectionNames;
use crate::types::{BodyId, DocumentKey};

/// Raw document as returned by a store: key plus JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Collection key (primary key).
    pub key: DocumentKey,
    /// Full JSON body.
    pub body: Value,
}

impl Document {
    /// Convenience constructor.
    pub fn new(key: impl Into<DocumentKey>, body: Value) -> Self {
        Self {
            key: key.into(),
            body,
        }
    }
}

/// Decoded state of a relating (foreign key) field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LinkRef {
    /// Field holds a usable id.
    Present(String),
    /// Field is absent, `null`, or an empty string.
    Missing,
    /// Field holds a JSON type that cannot be an id.
    Malformed(&'static str),
}

impl LinkRef {
    /// Decode `field` from a JSON object.
    pub fn from_field(body: &Value, field: &str) -> Self {
        match body.get(field) {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::String(value)) if value.is_empty() => Self::Missing,
            Some(Value::String(value)) => Self::Present(value.clone()),
            Some(Value::Number(number)) if number.is_i64() || number.is_u64() => {
                Self::Present(number.to_string())
            }
            Some(other) => Self::Malformed(json_type_name(other)),
        }
    }

    /// The id when present.
    pub fn as_present(&self) -> Option<&str> {
        match self {
            Self::Present(value) => Some(value.as_str()),
            Self::Missing | Self::Malformed(_) => None,
        }
    }
}

/// Primary-collection row projected to the fields the audit uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRow {
    /// Primary key; the scan cursor.
    pub key: DocumentKey,
    /// Reference into the auxiliary repositories collection.
    pub repository: LinkRef,
    /// Reference into the tertiary items collection (batch foreign key).
    pub item: LinkRef,
}

impl DocumentRow {
    /// Project a raw primary document.
    pub fn from_document(document: &Document, names: &CollectionNames) -> Self {
        Self {
            key: document.key.clone(),
            repository: LinkRef::from_field(&document.body, &names.repository_field),
            item: LinkRef::from_field(&document.body, &names.item_field),
        }
    }

    /// Item id used as the batch foreign key, if present.
    pub fn item_key(&self) -> Option<&str> {
        self.item.as_present()
    }
}

/// Attributes kept per repository in the reference index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryAttrs {
    /// Owning body, when the repository carries one.
    pub body: Option<BodyId>,
}

impl RepositoryAttrs {
    /// Project a raw repository document.
    pub fn from_document(document: &Document, names: &CollectionNames) -> Self {
        Self {
            body: LinkRef::from_field(&document.body, &names.body_field)
                .as_present()
                .map(str::to_string),
        }
    }
}

/// Linked bodies resolved for one item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemLinks {
    /// Distinct body ids the item is linked to.
    pub bodies: BTreeSet<BodyId>,
}

impl ItemLinks {
    /// Project a raw item document.
    ///
    /// A missing or non-array `bodies` field yields an empty set; entries that
    /// are not ids are dropped.
    pub fn from_document(document: &Document, names: &CollectionNames) -> Self {
        let bodies = match document.body.get(&names.bodies_field) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|value| match value {
                    Value::String(id) if !id.is_empty() => Some(id.clone()),
                    Value::Number(number) if number.is_i64() || number.is_u64() => {
                        Some(number.to_string())
                    }
                    _ => None,
                })
                .collect(),
            _ => BTreeSet::new(),
        };
        Self { bodies }
    }

    /// True when there is nothing to compare against.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Parse an RFC 3339 timestamp value into UTC.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

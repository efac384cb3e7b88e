//! Documents moved between the source database and backup copies.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single JSON document.
pub type Document = Value;

/// Documents keyed by collection name.
pub type CollectionDocuments = BTreeMap<String, Vec<Document>>;

/// Top-level field equality filter. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    fields: Map<String, Value>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Build a filter from a JSON object; any other JSON value is rejected.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            Value::Null => Some(Self::all()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        if self.fields.is_empty() {
            return true;
        }
        let Some(object) = document.as_object() else {
            return false;
        };
        self.fields
            .iter()
            .all(|(field, expected)| object.get(field) == Some(expected))
    }

    pub fn apply(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect()
    }
}

/// Total number of documents across all collections.
pub fn document_count(documents: &CollectionDocuments) -> usize {
    documents.values().map(Vec::len).sum()
}

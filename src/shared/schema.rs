//! Entity Schema Filter
//!
//! Strips payload fields the remote schema does not know about. Unknown fields
//! are dropped rather than rejected so that a client built against a newer
//! form never blocks on an older backend.

use crate::shared::entity::{EntityTable, FieldMap};
use std::collections::{HashMap, HashSet};

const THREAD_FIELDS: &[&str] = &[
    "title",
    "description",
    "status",
    "document_id",
    "organization_id",
    "created_by",
    "created_at",
    "updated_at",
];

const MESSAGE_FIELDS: &[&str] = &[
    "thread_id",
    "content",
    "role",
    "metadata",
    "created_by",
    "created_at",
];

const DOCUMENT_FIELDS: &[&str] = &[
    "title",
    "document_type",
    "content",
    "status",
    "jurisdiction",
    "regulation_refs",
    "organization_id",
    "created_by",
    "created_at",
    "updated_at",
];

/// Static allow-list of fields the remote accepts for a table
pub fn default_fields(table: EntityTable) -> &'static [&'static str] {
    match table {
        EntityTable::Threads => THREAD_FIELDS,
        EntityTable::Messages => MESSAGE_FIELDS,
        EntityTable::Documents => DOCUMENT_FIELDS,
    }
}

/// Per-table field allow-lists
#[derive(Debug, Clone)]
pub struct SchemaFilter {
    allowed: HashMap<EntityTable, HashSet<String>>,
}

impl Default for SchemaFilter {
    fn default() -> Self {
        let allowed = EntityTable::ALL
            .into_iter()
            .map(|table| {
                let fields = default_fields(table).iter().map(|f| f.to_string()).collect();
                (table, fields)
            })
            .collect();
        Self { allowed }
    }
}

impl SchemaFilter {
    /// Replace the allow-list of one table
    pub fn with_fields<I, S>(mut self, table: EntityTable, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .insert(table, fields.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `field` may be sent to `table`
    pub fn allows(&self, table: EntityTable, field: &str) -> bool {
        self.allowed
            .get(&table)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Keep only the allow-listed fields of `payload`
    pub fn filter(&self, table: EntityTable, payload: &FieldMap) -> FieldMap {
        let mut kept = FieldMap::new();
        let mut dropped = Vec::new();

        for (key, value) in payload {
            if self.allows(table, key) {
                kept.insert(key.clone(), value.clone());
            } else {
                dropped.push(key.as_str());
            }
        }

        if !dropped.is_empty() {
            tracing::debug!(table = %table, ?dropped, "Dropped fields not in remote schema");
        }

        kept
    }
}

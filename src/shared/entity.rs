//! Entity Types
//!
//! Generic record types that flow through the sync engine. The engine does not
//! know the shape of threads, messages or documents; it only knows which table
//! a record belongs to, its identifier, and a map of field values.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Field values of a record or payload
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Remote tables the client is allowed to mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    /// Compliance conversation threads
    Threads,
    /// Messages posted into a thread
    Messages,
    /// Generated compliance documents
    Documents,
}

impl EntityTable {
    /// All tables, in a stable order
    pub const ALL: [EntityTable; 3] = [Self::Threads, Self::Messages, Self::Documents];

    /// Table name as used by the remote backend and the local store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Messages => "messages",
            Self::Documents => "documents",
        }
    }

    /// Parse a table name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation carried by a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert a new record
    Create,
    /// Patch an existing record
    Update,
    /// Remove an existing record
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Identifier of an entity as seen by the UI
///
/// Items created while offline only have a client-minted token until the
/// server acknowledges them. The variant says which one you are holding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    /// Minted locally, not yet acknowledged by the server
    LocalOnly(Uuid),
    /// Assigned by the server
    Persisted(String),
}

impl EntityId {
    /// Whether this id has never been seen by the server
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalOnly(_))
    }

    /// Server-assigned id, if any
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::LocalOnly(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalOnly(token) => write!(f, "local:{token}"),
            Self::Persisted(id) => f.write_str(id),
        }
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::Persisted(id.to_string())
    }
}

/// Authoritative record as returned by the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Server-assigned id
    pub id: String,
    /// Every other column
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

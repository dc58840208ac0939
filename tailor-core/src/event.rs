//! Oplog Record and Change Event Representation
//!
//! This module defines the two record types that flow through the tailor
//! pipeline: the raw [`OplogEntry`] as written by the server, and the
//! [`ChangeEvent`] handed to subscribers after matching and (optionally)
//! enrichment.
//!
//! # Examples
//!
//! ```rust
//! use tailor_core::event::{ChangeEvent, Operation, OplogEntry};
//! use bson::{doc, Timestamp};
//!
//! let entry = OplogEntry {
//!     operation: Operation::Insert,
//!     namespace: "shop.orders".to_string(),
//!     object: doc! { "_id": 1, "total": 42 },
//!     selector: None,
//!     timestamp: Timestamp { time: 1_700_000_000, increment: 1 },
//! };
//!
//! let event = ChangeEvent::new(entry);
//! assert!(event.log.is_insert());
//! assert!(event.document.is_none());
//! ```

use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error that can occur when converting a raw oplog document into an [`OplogEntry`].
#[derive(Debug, Clone)]
pub enum ConversionError {
    /// A required oplog field was missing
    MissingField(&'static str),

    /// A field was present but had an unexpected BSON type
    InvalidField {
        /// Oplog field name
        field: &'static str,
        /// Description of what was found
        message: String,
    },
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::MissingField(field) => {
                write!(f, "Oplog record is missing field '{}'", field)
            }
            ConversionError::InvalidField { field, message } => {
                write!(f, "Oplog field '{}' is invalid: {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConversionError {}

/// Oplog operation codes.
///
/// The server writes single-letter codes into the `op` field of every record.
/// The `Unknown` variant keeps records from newer server versions flowing
/// instead of failing conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Operation {
    /// A document was inserted
    #[serde(rename = "i")]
    Insert,

    /// A document was updated in place
    #[serde(rename = "u")]
    Update,

    /// A document was deleted
    #[serde(rename = "d")]
    Delete,

    /// A collection-level command (drop, create, rename, ...) recorded against `<db>.$cmd`
    #[serde(rename = "c")]
    Command,

    /// A no-op marker written by the server (heartbeats, migrations)
    #[serde(rename = "n")]
    Noop,

    /// An operation code this library does not know about
    #[serde(untagged)]
    Unknown(String),
}

impl Operation {
    /// Parses an oplog `op` code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "i" => Operation::Insert,
            "u" => Operation::Update,
            "d" => Operation::Delete,
            "c" => Operation::Command,
            "n" => Operation::Noop,
            other => Operation::Unknown(other.to_string()),
        }
    }

    /// Returns the oplog `op` code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Operation::Insert => "i",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Command => "c",
            Operation::Noop => "n",
            Operation::Unknown(code) => code,
        }
    }

    /// Returns a readable name, used as a metrics label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Command => "command",
            Operation::Noop => "noop",
            Operation::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single record from the operation log.
///
/// Field names follow the server's on-disk layout so the struct can be
/// (de)serialized directly from and to BSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Operation code
    #[serde(rename = "op")]
    pub operation: Operation,

    /// Fully qualified `"<database>.<collection>"`, or `"<database>.$cmd"` for commands
    #[serde(rename = "ns")]
    pub namespace: String,

    /// Operation payload
    ///
    /// The inserted or deleted document, the update descriptor for updates,
    /// or the command arguments (e.g. `{ drop: "users" }`) for commands.
    #[serde(rename = "o")]
    pub object: Document,

    /// Target document selector, present only for updates
    #[serde(rename = "o2", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Document>,

    /// Position of this record in the log
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,
}

impl OplogEntry {
    /// Returns true if this is an insert record.
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.operation == Operation::Insert
    }

    /// Returns true if this is an update record.
    #[inline]
    pub fn is_update(&self) -> bool {
        self.operation == Operation::Update
    }

    /// Returns true if this is a delete record.
    #[inline]
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }

    /// Returns true if this is a collection-level command record.
    #[inline]
    pub fn is_command(&self) -> bool {
        self.operation == Operation::Command
    }

    /// Returns the `_id` of the document an update targets.
    pub fn target_id(&self) -> Option<&Bson> {
        self.selector.as_ref()?.get("_id")
    }
}

/// Conversion from a raw oplog document as read from `local.oplog.rs`.
///
/// Fields this library does not use (`h`, `v`, `ui`, `wall`, ...) are ignored.
impl TryFrom<Document> for OplogEntry {
    type Error = ConversionError;

    fn try_from(mut raw: Document) -> Result<Self, Self::Error> {
        let operation = match raw.get("op") {
            Some(Bson::String(code)) => Operation::from_code(code),
            Some(other) => {
                return Err(ConversionError::InvalidField {
                    field: "op",
                    message: format!("expected string, found {:?}", other.element_type()),
                })
            }
            None => return Err(ConversionError::MissingField("op")),
        };

        let namespace = match raw.remove("ns") {
            Some(Bson::String(ns)) => ns,
            Some(other) => {
                return Err(ConversionError::InvalidField {
                    field: "ns",
                    message: format!("expected string, found {:?}", other.element_type()),
                })
            }
            None => return Err(ConversionError::MissingField("ns")),
        };

        let object = match raw.remove("o") {
            Some(Bson::Document(o)) => o,
            Some(other) => {
                return Err(ConversionError::InvalidField {
                    field: "o",
                    message: format!("expected document, found {:?}", other.element_type()),
                })
            }
            None => return Err(ConversionError::MissingField("o")),
        };

        let selector = match raw.remove("o2") {
            Some(Bson::Document(o2)) => Some(o2),
            Some(Bson::Null) | None => None,
            Some(other) => {
                return Err(ConversionError::InvalidField {
                    field: "o2",
                    message: format!("expected document, found {:?}", other.element_type()),
                })
            }
        };

        let timestamp = match raw.get("ts") {
            Some(Bson::Timestamp(ts)) => *ts,
            Some(other) => {
                return Err(ConversionError::InvalidField {
                    field: "ts",
                    message: format!("expected timestamp, found {:?}", other.element_type()),
                })
            }
            None => return Err(ConversionError::MissingField("ts")),
        };

        Ok(Self {
            operation,
            namespace,
            object,
            selector,
            timestamp,
        })
    }
}

/// A change event delivered to pipeline subscribers.
///
/// `log` always carries the originating oplog record. `document` is only
/// filled for updates when full-document mode is on and the lookup found
/// the document; inserts, deletes and commands already carry the relevant
/// state in `log.object`.
///
/// ```rust
/// use tailor_core::event::ChangeEvent;
///
/// fn describe(event: &ChangeEvent) -> String {
///     match &event.document {
///         Some(doc) => format!("{} on {} -> {}", event.log.operation, event.log.namespace, doc),
///         None => format!("{} on {}", event.log.operation, event.log.namespace),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The originating oplog record
    pub log: OplogEntry,

    /// Current state of the updated document, when looked up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ChangeEvent {
    /// Wraps an oplog record without a looked-up document.
    #[must_use]
    pub fn new(log: OplogEntry) -> Self {
        Self {
            log,
            document: None,
        }
    }

    /// Wraps an update record together with the result of its lookup.
    #[must_use]
    pub fn with_document(log: OplogEntry, document: Option<Document>) -> Self {
        Self { log, document }
    }

    /// Returns true if a looked-up document is attached.
    #[inline]
    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }
}

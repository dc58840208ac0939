// Copyright 2025 Tailor Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Oplog source abstraction.
//!
//! The pipeline does not talk to a database itself. It drives an
//! [`OplogSource`], which owns the transport and provides three things:
//!
//! 1. A stream of raw oplog documents for the configured database, available
//!    once [`connect`](OplogSource::connect) succeeds. The end of the stream
//!    is the `end` signal.
//! 2. Per-collection [`CollectionLookup`] handles used to fetch the current
//!    state of a document by `_id`.
//! 3. Explicit teardown via [`close`](OplogSource::close).
//!
//! Implementations live in the `tailor-sources` crate (in-memory and
//! MongoDB). A minimal implementation looks like this:
//!
//! ```rust
//! use async_trait::async_trait;
//! use bson::{Bson, Document};
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use tailor_core::config::WatchConfig;
//! use tailor_core::source::{CollectionLookup, OplogSource, OplogStream, SourceError};
//!
//! struct EmptySource;
//!
//! struct NoDocuments(String);
//!
//! #[async_trait]
//! impl CollectionLookup for NoDocuments {
//!     fn name(&self) -> &str {
//!         &self.0
//!     }
//!
//!     async fn find_by_id(&self, _id: &Bson) -> Result<Option<Document>, SourceError> {
//!         Ok(None)
//!     }
//! }
//!
//! #[async_trait]
//! impl OplogSource for EmptySource {
//!     async fn connect(&mut self, _config: &WatchConfig) -> Result<OplogStream, SourceError> {
//!         Ok(futures::stream::empty().boxed())
//!     }
//!
//!     fn collection(&self, name: &str) -> Arc<dyn CollectionLookup> {
//!         Arc::new(NoDocuments(name.to_string()))
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SourceError> {
//!         Ok(())
//!     }
//! }
//! ```

use crate::config::WatchConfig;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Stream of raw oplog documents produced by a connected source.
pub type OplogStream = BoxStream<'static, Result<Document, SourceError>>;

/// Errors reported by an [`OplogSource`] or a [`CollectionLookup`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// Establishing the transport failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The transport reported a fault while streaming.
    #[error("Stream error: {message}")]
    Stream {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document lookup failed.
    #[error("Lookup error on '{collection}': {message}")]
    Lookup {
        /// Collection the lookup ran against
        collection: String,
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The source was used after being closed.
    #[error("Source is closed")]
    Closed,
}

impl SourceError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a stream error from any error type.
    #[must_use]
    pub fn stream(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Stream {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a stream error with a custom message.
    #[must_use]
    pub fn stream_msg(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a lookup error from any error type.
    #[must_use]
    pub fn lookup(
        collection: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Lookup {
            collection: collection.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a lookup error with a custom message.
    #[must_use]
    pub fn lookup_msg(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lookup {
            collection: collection.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Read-only handle for fetching documents of one collection by `_id`.
///
/// Handles are shared between concurrent enrichment tasks, so
/// implementations must tolerate parallel calls.
#[async_trait]
pub trait CollectionLookup: Send + Sync {
    /// Name of the collection this handle reads from.
    fn name(&self) -> &str;

    /// Fetches the current document with the given `_id`.
    ///
    /// Returns `Ok(None)` if no such document exists (for example because it
    /// was deleted after the update was logged).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Lookup`] if the read fails.
    async fn find_by_id(&self, id: &Bson) -> Result<Option<Document>, SourceError>;
}

/// Transport that tails an oplog and serves document lookups.
#[async_trait]
pub trait OplogSource: Send + 'static {
    /// Connects the transport and starts tailing records of `config.database()`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the transport cannot be established.
    async fn connect(&mut self, config: &WatchConfig) -> Result<OplogStream, SourceError>;

    /// Builds a lookup handle for a collection of the connected database.
    fn collection(&self, name: &str) -> Arc<dyn CollectionLookup>;

    /// Tears down the transport. Must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not be shut down cleanly.
    async fn close(&mut self) -> Result<(), SourceError>;
}

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

//! In-memory oplog source.
//!
//! [`MemoryOplog`] plays the role of a database and its oplog: writes made
//! through it update an in-memory document store and append the matching
//! oplog record to every connected stream.
//!
//! # Use Cases
//!
//! - **Local development and testing** - No database required
//! - **Fault injection** - Failed connects, failed lookups, stream errors
//!
//! # Limitations
//!
//! - **No history** - Streams only see records written after they connect
//! - **`$set` only** - Updates merge fields; no other update operators
//!
//! # Example
//!
//! ```rust
//! use bson::doc;
//! use tailor_core::pipeline::{Pipeline, PipelineEvent};
//! use tailor_core::config::WatchConfig;
//! use tailor_sources::memory::MemoryOplog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let oplog = MemoryOplog::new("shop");
//! let config = WatchConfig::builder()
//!     .uri("memory://")
//!     .database("shop")
//!     .collections(["orders"])
//!     .build()?;
//!
//! let (mut pipeline, mut events) = Pipeline::with_config(config, oplog.clone());
//! assert!(matches!(events.recv().await, Some(PipelineEvent::Connected)));
//!
//! oplog.insert("orders", doc! { "_id": 1, "total": 10 }).await;
//! let event = events.recv().await.unwrap();
//! assert!(event.as_change().is_some());
//!
//! pipeline.destroy().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document, Timestamp};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tailor_core::config::WatchConfig;
use tailor_core::source::{CollectionLookup, OplogSource, OplogStream, SourceError};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

type RecordSender = mpsc::UnboundedSender<Result<Document, SourceError>>;

/// In-memory database and oplog for one database.
///
/// Cloning yields another handle to the same data, so a test can keep one
/// handle for writes while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct MemoryOplog {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    database: String,
    state: RwLock<State>,
    increment: AtomicU32,
    lookups: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    subscribers: Vec<Subscriber>,
    connect_failure: Option<String>,
    lookup_failure: Option<String>,
    lookup_delay: Option<Duration>,
    connects: usize,
    closes: usize,
}

#[derive(Debug)]
struct Subscriber {
    prefix: String,
    tx: RecordSender,
}

impl MemoryOplog {
    /// Creates an empty database named `database`.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        let database = database.into();
        debug!(database = %database, "Creating in-memory oplog");
        Self {
            inner: Arc::new(Inner {
                database,
                state: RwLock::new(State::default()),
                increment: AtomicU32::new(0),
                lookups: AtomicUsize::new(0),
            }),
        }
    }

    /// Name of the database this oplog belongs to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// Inserts a document and logs an `i` record.
    ///
    /// A document without `_id` gets a fresh `ObjectId`. Returns the `_id`.
    pub async fn insert(&self, collection: &str, mut document: Document) -> Bson {
        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);

        let mut state = self.inner.state.write().await;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(document.clone());

        let record = self.record("i", collection, document, None);
        Self::publish(&mut state, record);
        id
    }

    /// Merges `changes` into the document with `_id == id` and logs a `u`
    /// record with a `$set` descriptor.
    ///
    /// Returns `false` (and logs nothing) if no such document exists.
    pub async fn update(&self, collection: &str, id: impl Into<Bson>, changes: Document) -> bool {
        let id = id.into();
        let mut state = self.inner.state.write().await;

        let Some(document) = state
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|d| d.get("_id") == Some(&id)))
        else {
            trace!(collection, id = %id, "Update matched no document");
            return false;
        };

        for (key, value) in &changes {
            document.insert(key.clone(), value.clone());
        }

        let record = self.record(
            "u",
            collection,
            doc! { "$set": changes },
            Some(doc! { "_id": id }),
        );
        Self::publish(&mut state, record);
        true
    }

    /// Removes the document with `_id == id` and logs a `d` record.
    ///
    /// Returns `false` (and logs nothing) if no such document exists.
    pub async fn delete(&self, collection: &str, id: impl Into<Bson>) -> bool {
        let id = id.into();
        let mut state = self.inner.state.write().await;

        let removed = state.collections.get_mut(collection).is_some_and(|documents| {
            let before = documents.len();
            documents.retain(|d| d.get("_id") != Some(&id));
            documents.len() < before
        });

        if !removed {
            trace!(collection, id = %id, "Delete matched no document");
            return false;
        }

        let record = self.record("d", collection, doc! { "_id": id }, None);
        Self::publish(&mut state, record);
        true
    }

    /// Drops a collection and logs a `drop` command on `<database>.$cmd`.
    pub async fn drop_collection(&self, collection: &str) {
        let mut state = self.inner.state.write().await;
        state.collections.remove(collection);

        let record = self.record("c", "$cmd", doc! { "drop": collection }, None);
        Self::publish(&mut state, record);
    }

    /// Appends an arbitrary record to every connected stream.
    ///
    /// The record is delivered as is, so it may name another database or be
    /// malformed altogether.
    pub async fn push_raw(&self, record: Document) {
        let mut state = self.inner.state.write().await;
        Self::publish(&mut state, record);
    }

    /// Makes the next [`connect`](OplogSource::connect) fail with `message`.
    pub async fn fail_next_connect(&self, message: impl Into<String>) {
        self.inner.state.write().await.connect_failure = Some(message.into());
    }

    /// Makes every lookup fail with `message` until cleared with `None`.
    pub async fn set_lookup_failure(&self, message: Option<String>) {
        self.inner.state.write().await.lookup_failure = message;
    }

    /// Delays every lookup by `delay` until cleared with `None`.
    pub async fn set_lookup_delay(&self, delay: Option<Duration>) {
        self.inner.state.write().await.lookup_delay = delay;
    }

    /// Sends a stream error to every connected stream.
    pub async fn fail_stream(&self, message: &str) {
        let mut state = self.inner.state.write().await;
        state
            .subscribers
            .retain(|s| s.tx.send(Err(SourceError::stream_msg(message))).is_ok());
    }

    /// Ends every connected stream.
    pub async fn end_streams(&self) {
        let mut state = self.inner.state.write().await;
        debug!(streams = state.subscribers.len(), "Ending oplog streams");
        state.subscribers.clear();
    }

    /// Current contents of a collection.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .state
            .read()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of successful connects so far.
    pub async fn connect_count(&self) -> usize {
        self.inner.state.read().await.connects
    }

    /// Number of times [`close`](OplogSource::close) was called.
    pub async fn close_count(&self) -> usize {
        self.inner.state.read().await.closes
    }

    /// Number of lookups served, including failed ones.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.inner.lookups.load(Ordering::SeqCst)
    }

    fn record(
        &self,
        op: &str,
        collection: &str,
        object: Document,
        selector: Option<Document>,
    ) -> Document {
        let mut record = doc! {
            "ts": self.next_timestamp(),
            "op": op,
            "ns": format!("{}.{}", self.inner.database, collection),
            "o": object,
        };
        if let Some(selector) = selector {
            record.insert("o2", selector);
        }
        record
    }

    fn next_timestamp(&self) -> Timestamp {
        let time = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
        let increment = self.inner.increment.fetch_add(1, Ordering::SeqCst) + 1;
        Timestamp { time, increment }
    }

    fn publish(state: &mut State, record: Document) {
        let namespace = record.get_str("ns").ok().map(str::to_string);
        trace!(namespace = ?namespace, "Publishing oplog record");

        state.subscribers.retain(|subscriber| {
            let in_scope = namespace
                .as_deref()
                .map_or(true, |ns| ns.starts_with(&subscriber.prefix));
            !in_scope || subscriber.tx.send(Ok(record.clone())).is_ok()
        });
    }
}

#[async_trait]
impl OplogSource for MemoryOplog {
    async fn connect(&mut self, config: &WatchConfig) -> Result<OplogStream, SourceError> {
        let mut state = self.inner.state.write().await;

        if let Some(message) = state.connect_failure.take() {
            warn!(message = %message, "Failing connect on request");
            return Err(SourceError::connection_msg(message));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(Subscriber {
            prefix: format!("{}.", config.database()),
            tx,
        });
        state.connects += 1;

        debug!(
            database = config.database(),
            streams = state.subscribers.len(),
            "Connected in-memory oplog stream"
        );

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|record| (record, rx))
        });
        Ok(stream.boxed())
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionLookup> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        let mut state = self.inner.state.write().await;
        state.closes += 1;
        state.subscribers.clear();
        debug!(closes = state.closes, "Closed in-memory oplog");
        Ok(())
    }
}

/// Lookup handle for one collection of a [`MemoryOplog`].
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl CollectionLookup for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_by_id(&self, id: &Bson) -> Result<Option<Document>, SourceError> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);

        let (failure, delay) = {
            let state = self.inner.state.read().await;
            (state.lookup_failure.clone(), state.lookup_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = failure {
            return Err(SourceError::lookup_msg(&self.name, message));
        }

        let state = self.inner.state.read().await;
        Ok(state.collections.get(&self.name).and_then(|documents| {
            documents
                .iter()
                .find(|d| d.get("_id") == Some(id))
                .cloned()
        }))
    }
}

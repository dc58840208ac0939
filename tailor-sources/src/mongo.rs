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

//! `MongoDB` oplog source.
//!
//! Tails `local.oplog.rs` of a replica set member with a tailable, awaiting
//! cursor. Only records written after [`connect`](OplogSource::connect) are
//! delivered, and the server filters them down to the configured database.
//!
//! # Requirements
//!
//! - A replica set (the oplog does not exist on standalone servers)
//! - Read access to the `local` database
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tailor_core::pipeline::Pipeline;
//! use tailor_sources::mongo::MongoOplog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = json!({
//!     "uri": "mongodb://localhost:27017/?replicaSet=rs0",
//!     "database": "shop",
//!     "collections": "*",
//! });
//!
//! let (mut pipeline, mut events) = Pipeline::create(Some(&config), MongoOplog::new())?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! pipeline.destroy().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::{doc, Bson, Document, Timestamp};
use futures::StreamExt;
use mongodb::options::CursorType;
use mongodb::{Client, Collection, Database};
use std::sync::Arc;
use tailor_core::config::WatchConfig;
use tailor_core::source::{CollectionLookup, OplogSource, OplogStream, SourceError};
use tracing::{debug, info, instrument, trace};

/// Database holding the oplog.
const OPLOG_DATABASE: &str = "local";

/// Oplog collection of a replica set member.
const OPLOG_COLLECTION: &str = "oplog.rs";

/// Oplog source backed by a `MongoDB` replica set.
#[derive(Debug, Default)]
pub struct MongoOplog {
    client: Option<Client>,
    owns_client: bool,
    database: Option<Database>,
}

impl MongoOplog {
    /// Creates a source that connects using the configuration's URI.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source that reuses an existing client.
    ///
    /// The configuration's URI is ignored in this case. The client stays
    /// usable after [`close`](OplogSource::close); shutting it down is left
    /// to the caller.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client: Some(client),
            owns_client: false,
            database: None,
        }
    }

    /// Takes the client if this source created it.
    fn take_owned_client(&mut self) -> Option<Client> {
        if self.owns_client {
            self.owns_client = false;
            self.client.take()
        } else {
            None
        }
    }

    /// Position to start tailing from: the newest record currently in the oplog.
    async fn latest_timestamp(oplog: &Collection<Document>) -> Result<Timestamp, SourceError> {
        let latest = oplog
            .find_one(doc! {})
            .sort(doc! { "$natural": -1 })
            .await
            .map_err(SourceError::connection)?;

        match latest.as_ref().map(|record| record.get_timestamp("ts")) {
            Some(Ok(ts)) => Ok(ts),
            Some(Err(e)) => Err(SourceError::connection(e)),
            None => {
                let time = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
                Ok(Timestamp { time, increment: 0 })
            }
        }
    }
}

#[async_trait]
impl OplogSource for MongoOplog {
    #[instrument(skip(self, config), fields(database = %config.database()))]
    async fn connect(&mut self, config: &WatchConfig) -> Result<OplogStream, SourceError> {
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                debug!("Creating MongoDB client");
                let client = Client::with_uri_str(config.uri())
                    .await
                    .map_err(SourceError::connection)?;
                self.client = Some(client.clone());
                self.owns_client = true;
                client
            }
        };

        let oplog: Collection<Document> = client
            .database(OPLOG_DATABASE)
            .collection(OPLOG_COLLECTION);

        let start = Self::latest_timestamp(&oplog).await?;
        let filter = doc! {
            "ts": { "$gt": start },
            "ns": { "$regex": namespace_pattern(config.database()) },
        };

        let cursor = oplog
            .find(filter)
            .cursor_type(CursorType::TailableAwait)
            .no_cursor_timeout(true)
            .await
            .map_err(SourceError::connection)?;

        self.database = Some(client.database(config.database()));

        info!(start = ?start, "Tailing oplog");

        Ok(cursor
            .map(|record| record.map_err(SourceError::stream))
            .boxed())
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionLookup> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            collection: self
                .database
                .as_ref()
                .map(|database| database.collection(name)),
        })
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.database = None;
        if let Some(client) = self.take_owned_client() {
            debug!("Shutting down MongoDB client");
            client.shutdown().await;
        }
        Ok(())
    }
}

/// Lookup handle for one collection of the watched database.
#[derive(Debug)]
pub struct MongoCollection {
    name: String,
    collection: Option<Collection<Document>>,
}

#[async_trait]
impl CollectionLookup for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_by_id(&self, id: &Bson) -> Result<Option<Document>, SourceError> {
        let collection = self.collection.as_ref().ok_or(SourceError::Closed)?;
        trace!(collection = %self.name, id = %id, "Finding document by _id");

        collection
            .find_one(doc! { "_id": id.clone() })
            .await
            .map_err(|e| SourceError::lookup(&self.name, e))
    }
}

/// Anchored regex matching every namespace of `database`.
fn namespace_pattern(database: &str) -> String {
    format!("^{}\\.", regex::escape(database))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_pattern() {
        assert_eq!(namespace_pattern("shop"), "^shop\\.");
        assert_eq!(namespace_pattern("a+b"), "^a\\+b\\.");
    }

    #[test]
    fn test_namespace_pattern_escapes_metacharacters() {
        assert_eq!(namespace_pattern("a.b"), "^a\\.b\\.");
        assert_eq!(namespace_pattern("x[1]$"), "^x\\[1\\]\\$\\.");
    }

    #[tokio::test]
    async fn test_close_keeps_borrowed_client() {
        let client = Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let mut source = MongoOplog::with_client(client);

        assert!(source.take_owned_client().is_none());
        assert!(source.client.is_some());
    }

    #[tokio::test]
    async fn test_close_releases_owned_client() {
        let client = Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let mut source = MongoOplog {
            client: Some(client),
            owns_client: true,
            database: None,
        };

        assert!(source.take_owned_client().is_some());
        assert!(source.client.is_none());
        assert!(source.take_owned_client().is_none());
    }

    #[tokio::test]
    async fn test_lookup_before_connect_is_closed() {
        let source = MongoOplog::new();
        let lookup = source.collection("users");
        assert_eq!(lookup.name(), "users");
        assert!(matches!(
            lookup.find_by_id(&Bson::Int32(1)).await,
            Err(SourceError::Closed)
        ));
    }
}

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

//! Integration tests for the MongoDB oplog source.
//!
//! These tests require a MongoDB replica set. Start one with:
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 mongo:7.0 --replSet rs0
//! docker exec mongodb mongosh --eval "rs.initiate()"
//! ```
//!
//! and run:
//! ```bash
//! cargo test --package tailor-sources --test mongo_integration_test -- --ignored
//! ```

#![cfg(feature = "mongodb")]

use bson::{doc, Document};
use mongodb::Client;
use serde_json::json;
use std::time::Duration;
use tailor_core::event::Operation;
use tailor_core::pipeline::{Pipeline, PipelineEvent, PipelineEvents};
use tailor_sources::mongo::MongoOplog;
use tokio::time::timeout;

fn mongodb_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| {
        "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true".to_string()
    })
}

async fn next(events: &mut PipelineEvents) -> PipelineEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
#[ignore] // Requires a MongoDB replica set
async fn test_tail_insert_and_enriched_update() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::with_uri_str(mongodb_uri()).await?;
    let collection = client
        .database("tailor_test")
        .collection::<Document>("events");
    collection.drop().await.ok();

    let config = json!({
        "uri": mongodb_uri(),
        "database": "tailor_test",
        "collections": "events",
        "fullDocument": true,
    });
    let (mut pipeline, mut events) =
        Pipeline::create(Some(&config), MongoOplog::with_client(client.clone()))?;
    assert!(matches!(next(&mut events).await, PipelineEvent::Connected));

    collection.insert_one(doc! { "_id": "a", "n": 0 }).await?;
    collection
        .update_one(doc! { "_id": "a" }, doc! { "$set": { "n": 3 } })
        .await?;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        if let PipelineEvent::Change(change) = next(&mut events).await {
            seen.push(change);
        }
    }

    assert_eq!(seen[0].log.operation, Operation::Insert);
    assert_eq!(seen[1].log.operation, Operation::Update);
    let document = seen[1].document.as_ref().expect("document attached");
    assert_eq!(document.get_i32("n")?, 3);

    pipeline.destroy().await;
    Ok(())
}

#[tokio::test]
#[ignore] // Waits for server selection to time out
async fn test_unreachable_server_reports_connect_error() {
    let config = json!({
        "uri": "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200",
        "database": "tailor_test",
        "collections": "*",
    });
    let (mut pipeline, mut events) =
        Pipeline::create(Some(&config), MongoOplog::new()).unwrap();

    match next(&mut events).await {
        PipelineEvent::Error(e) => assert_eq!(e.category(), "connect"),
        other => panic!("expected connect error, got {other:?}"),
    }

    pipeline.destroy().await;
}

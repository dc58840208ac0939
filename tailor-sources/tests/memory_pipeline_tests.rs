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

//! End-to-end tests of the pipeline over the in-memory oplog.

use bson::doc;
use serde_json::json;
use std::time::Duration;
use tailor_core::event::{ChangeEvent, Operation};
use tailor_core::pipeline::{Pipeline, PipelineError, PipelineEvent, PipelineEvents, PipelineState};
use tailor_sources::memory::MemoryOplog;
use tokio::time::timeout;

async fn next(events: &mut PipelineEvents) -> PipelineEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_change(events: &mut PipelineEvents) -> ChangeEvent {
    match next(events).await {
        PipelineEvent::Change(change) => change,
        other => panic!("expected change, got {other:?}"),
    }
}

async fn start(oplog: &MemoryOplog, collections: &str, full_document: bool) -> (Pipeline, PipelineEvents) {
    let config = json!({
        "uri": "memory://",
        "database": oplog.database(),
        "collections": collections,
        "fullDocument": full_document,
    });
    let (pipeline, mut events) = Pipeline::create(Some(&config), oplog.clone()).unwrap();
    assert!(matches!(next(&mut events).await, PipelineEvent::Connected));
    (pipeline, events)
}

#[tokio::test]
async fn test_insert_then_update_with_full_document() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let oplog = MemoryOplog::new("d");
    let (mut pipeline, mut events) = start(&oplog, "c", true).await;

    oplog.insert("c", doc! { "_id": "a", "n": 0 }).await;
    oplog.update("c", "a", doc! { "n": 3 }).await;

    let insert = next_change(&mut events).await;
    assert_eq!(insert.log.operation, Operation::Insert);
    assert_eq!(insert.log.object, doc! { "_id": "a", "n": 0 });
    assert!(insert.document.is_none());

    let update = next_change(&mut events).await;
    assert_eq!(update.log.operation, Operation::Update);
    assert_eq!(update.log.object, doc! { "$set": { "n": 3 } });
    let document = update.document.expect("document attached");
    assert_eq!(document.get_i32("n").unwrap(), 3);

    pipeline.destroy().await;
    assert_eq!(oplog.close_count().await, 1);
}

#[tokio::test]
async fn test_inserts_deletes_and_commands_skip_lookups() {
    let oplog = MemoryOplog::new("d");
    let (mut pipeline, mut events) = start(&oplog, "c", true).await;

    oplog.insert("c", doc! { "_id": 1, "n": 0 }).await;
    oplog.insert("c", doc! { "_id": 2, "n": 0 }).await;
    oplog.delete("c", 2).await;
    oplog.drop_collection("other").await;
    oplog.drop_collection("c").await;

    assert_eq!(next_change(&mut events).await.log.operation, Operation::Insert);
    assert_eq!(next_change(&mut events).await.log.operation, Operation::Insert);
    assert_eq!(next_change(&mut events).await.log.operation, Operation::Delete);
    assert_eq!(next_change(&mut events).await.log.operation, Operation::Command);
    assert_eq!(oplog.lookup_count(), 0);

    oplog.insert("c", doc! { "_id": 3, "n": 0 }).await;
    oplog.update("c", 3, doc! { "n": 1 }).await;

    assert_eq!(next_change(&mut events).await.log.operation, Operation::Insert);
    let update = next_change(&mut events).await;
    assert_eq!(update.log.operation, Operation::Update);
    assert_eq!(update.document, Some(doc! { "_id": 3, "n": 1 }));
    assert_eq!(oplog.lookup_count(), 1);

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_update_of_deleted_document_has_no_document() {
    let oplog = MemoryOplog::new("d");
    oplog.insert("c", doc! { "_id": 1, "n": 0 }).await;
    oplog.set_lookup_delay(Some(Duration::from_millis(50))).await;
    let (mut pipeline, mut events) = start(&oplog, "c", true).await;

    oplog.update("c", 1, doc! { "n": 1 }).await;
    oplog.delete("c", 1).await;

    // the delete overtakes the delayed lookup
    let delete = next_change(&mut events).await;
    assert_eq!(delete.log.operation, Operation::Delete);

    let update = next_change(&mut events).await;
    assert_eq!(update.log.operation, Operation::Update);
    assert!(update.document.is_none());

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_drop_of_watched_collection() {
    let oplog = MemoryOplog::new("d");
    let (mut pipeline, mut events) = start(&oplog, "c", false).await;

    oplog.drop_collection("other").await;
    oplog.drop_collection("c").await;

    let change = next_change(&mut events).await;
    assert_eq!(change.log.operation, Operation::Command);
    assert_eq!(change.log.object, doc! { "drop": "c" });

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_other_databases_are_not_delivered() {
    let oplog = MemoryOplog::new("d");
    let (mut pipeline, mut events) = start(&oplog, "*", false).await;

    oplog
        .push_raw(doc! { "ts": bson::Timestamp { time: 1, increment: 1 }, "op": "i", "ns": "x.c", "o": { "_id": 1 } })
        .await;
    oplog.insert("c", doc! { "_id": 2 }).await;

    let change = next_change(&mut events).await;
    assert_eq!(change.log.namespace, "d.c");

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_lookup_failure_is_reported() {
    let oplog = MemoryOplog::new("d");
    oplog.insert("c", doc! { "_id": 1 }).await;
    let (mut pipeline, mut events) = start(&oplog, "c", true).await;

    oplog.set_lookup_failure(Some("replica unavailable".into())).await;
    oplog.update("c", 1, doc! { "n": 1 }).await;

    match next(&mut events).await {
        PipelineEvent::Error(PipelineError::Enrichment(e)) => {
            assert!(e.to_string().contains("replica unavailable"));
        }
        other => panic!("expected enrichment error, got {other:?}"),
    }

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_connect_failure_then_destroy() {
    let oplog = MemoryOplog::new("d");
    oplog.fail_next_connect("connection refused").await;

    let config = json!({ "uri": "memory://", "db": "d", "collections": ["c"] });
    let (mut pipeline, mut events) = Pipeline::create(Some(&config), oplog.clone()).unwrap();

    assert!(matches!(
        next(&mut events).await,
        PipelineEvent::Error(PipelineError::Connect(_))
    ));
    assert_eq!(pipeline.state().await, PipelineState::Connecting);

    pipeline.destroy().await;
    assert_eq!(pipeline.state().await, PipelineState::Destroyed);
    assert_eq!(oplog.connect_count().await, 0);
    assert_eq!(oplog.close_count().await, 1);
}

#[tokio::test]
async fn test_end_of_stream() {
    let oplog = MemoryOplog::new("d");
    let (mut pipeline, mut events) = start(&oplog, "c", false).await;

    oplog.end_streams().await;
    assert!(matches!(next(&mut events).await, PipelineEvent::End));

    pipeline.destroy().await;
    assert!(events.recv().await.is_none());
}

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

//! Oplog Tailing Example
//!
//! Tails a database and prints every change as one JSON line on stdout.
//! Logs go to stderr.
//!
//! # Prerequisites
//!
//! Start MongoDB as a replica set (the oplog only exists on replica sets):
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 \
//!   mongo:7.0 --replSet rs0
//!
//! docker exec mongodb mongosh --eval "rs.initiate()"
//! ```
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --package tailor-sources --example tail -- \
//!   --database testdb --collections users,orders --full-document
//! ```
//!
//! Use `--collections '*'` to watch every collection of the database.

use clap::Parser;
use serde_json::json;
use std::error::Error;
use tailor_core::pipeline::{Pipeline, PipelineEvent};
use tailor_sources::mongo::MongoOplog;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Print MongoDB oplog changes as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "tail")]
struct Args {
    /// MongoDB connection URI
    #[arg(
        long,
        env = "MONGODB_URI",
        default_value = "mongodb://localhost:27017/?replicaSet=rs0&directConnection=true"
    )]
    uri: String,

    /// Database to tail
    #[arg(long, default_value = "testdb")]
    database: String,

    /// Comma-delimited collections, or `*` for all
    #[arg(long, default_value = "*")]
    collections: String,

    /// Attach the current document to update events
    #[arg(long)]
    full_document: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let args = Args::parse();

    let config = json!({
        "uri": args.uri,
        "database": args.database,
        "collections": args.collections,
        "fullDocument": args.full_document,
    });

    let (mut pipeline, mut events) = Pipeline::create(Some(&config), MongoOplog::new())?;
    info!(
        database = %pipeline.config().database(),
        scope = %pipeline.config().scope().description(),
        "Pipeline created, press Ctrl+C to stop"
    );

    let mut changes = 0usize;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Some(PipelineEvent::Connected) => info!("Connected, tailing oplog"),
                Some(PipelineEvent::Change(change)) => {
                    changes += 1;
                    println!("{}", serde_json::to_string(&change)?);
                }
                Some(PipelineEvent::Error(e)) => error!(error = %e, category = e.category(), "Pipeline error"),
                Some(PipelineEvent::End) => {
                    warn!("Oplog stream ended");
                    break;
                }
                None => break,
            },
        }
    }

    pipeline.destroy().await;
    info!(changes, "Stopped");

    Ok(())
}

/// Initialize structured logging on stderr
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tailor_core=info,tailor_sources=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

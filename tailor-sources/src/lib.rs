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

//! Oplog source implementations for the tailor pipeline.
//!
//! This crate provides backends for the
//! [`OplogSource`](tailor_core::source::OplogSource) trait.
//!
//! # Available Sources
//!
//! - **Memory** (always available): in-process database and oplog for tests
//!   and local development
//! - **MongoDB** (`mongodb` feature, on by default): tails `local.oplog.rs`
//!   of a replica set
//!
//! # Feature Flags
//!
//! - `mongodb`: Enables the `MongoDB` source
//!
//! # Example: Memory Source
//!
//! ```rust
//! use bson::doc;
//! use tailor_sources::memory::MemoryOplog;
//!
//! # async fn example() {
//! let oplog = MemoryOplog::new("shop");
//! oplog.insert("orders", doc! { "_id": 1, "total": 10 }).await;
//! assert_eq!(oplog.documents("orders").await.len(), 1);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;

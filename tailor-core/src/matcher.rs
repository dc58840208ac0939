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

//! Namespace matching for oplog records.
//!
//! Decides whether a record belongs to a watched collection. Besides plain
//! `"<database>.<collection>"` namespaces, collection-level commands are
//! recorded against `"<database>.$cmd"` with the affected collection named
//! in the command arguments (`{ drop: "users" }`, `{ create: "users" }`),
//! so for those the argument values are inspected instead.
//!
//! ```rust
//! use bson::{doc, Timestamp};
//! use tailor_core::config::WatchConfig;
//! use tailor_core::event::{Operation, OplogEntry};
//! use tailor_core::matcher::NamespaceMatcher;
//!
//! let config = WatchConfig::builder()
//!     .uri("mongodb://localhost")
//!     .database("shop")
//!     .collections(["orders"])
//!     .build()?;
//! let matcher = NamespaceMatcher::new(&config);
//!
//! let drop = OplogEntry {
//!     operation: Operation::Command,
//!     namespace: "shop.$cmd".to_string(),
//!     object: doc! { "drop": "orders" },
//!     selector: None,
//!     timestamp: Timestamp { time: 0, increment: 1 },
//! };
//! assert!(matcher.is_watched(&drop));
//! # Ok::<(), tailor_core::config::ConfigError>(())
//! ```

use crate::config::WatchConfig;
use crate::event::OplogEntry;
use crate::watch_scope::WatchScope;
use bson::Bson;

/// Collection name the server uses for command records.
pub const COMMAND_COLLECTION: &str = "$cmd";

/// Matches oplog records against a [`WatchConfig`].
#[derive(Debug, Clone)]
pub struct NamespaceMatcher {
    prefix: String,
    command_namespace: String,
    scope: WatchScope,
}

impl NamespaceMatcher {
    /// Creates a matcher for the configured database and collections.
    #[must_use]
    pub fn new(config: &WatchConfig) -> Self {
        let database = config.database();
        Self {
            prefix: format!("{}.", database),
            command_namespace: format!("{}.{}", database, COMMAND_COLLECTION),
            scope: config.scope().clone(),
        }
    }

    /// Strips the `"<database>."` prefix from a namespace.
    ///
    /// Namespaces of other databases are returned unchanged.
    #[must_use]
    pub fn collection_name<'a>(&self, namespace: &'a str) -> &'a str {
        namespace.strip_prefix(&self.prefix).unwrap_or(namespace)
    }

    /// The `"<database>.$cmd"` namespace of the watched database.
    #[must_use]
    pub fn command_namespace(&self) -> &str {
        &self.command_namespace
    }

    /// Returns `true` if the record belongs to a watched collection.
    ///
    /// Watching everything short-circuits all other checks. Command records
    /// match when any argument value names a watched collection, whatever
    /// the argument key.
    #[must_use]
    pub fn is_watched(&self, entry: &OplogEntry) -> bool {
        if self.scope.is_all() {
            return true;
        }

        if self.scope.contains(self.collection_name(&entry.namespace)) {
            return true;
        }

        if entry.namespace != self.command_namespace {
            return false;
        }

        entry.object.values().any(|value| match value {
            Bson::String(name) => self.scope.contains(name),
            _ => false,
        })
    }
}

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

//! Watch configuration.
//!
//! A [`WatchConfig`] describes what a pipeline tails: the connection URI,
//! the database, the collections inside it and whether updates are enriched
//! with the current document. It is validated once and never mutated.
//!
//! Configurations are either built in code:
//!
//! ```rust
//! use tailor_core::config::WatchConfig;
//!
//! let config = WatchConfig::builder()
//!     .uri("mongodb://localhost:27017")
//!     .database("shop")
//!     .collections(["orders", "customers"])
//!     .full_document(true)
//!     .build()?;
//!
//! assert_eq!(config.collections(), ["orders", "customers"]);
//! # Ok::<(), tailor_core::config::ConfigError>(())
//! ```
//!
//! or read from an untyped value, where `collections` may also be a
//! comma-delimited string:
//!
//! ```rust
//! use serde_json::json;
//! use tailor_core::config::WatchConfig;
//!
//! let value = json!({
//!     "uri": "mongodb://localhost:27017",
//!     "db": "shop",
//!     "collections": "orders,*",
//! });
//!
//! let config = WatchConfig::from_value(Some(&value))?;
//! assert!(config.scope().is_all());
//! # Ok::<(), tailor_core::config::ConfigError>(())
//! ```

use crate::watch_scope::WatchScope;
use serde::Deserialize;
use serde_json::Value;

/// Errors raised while validating a [`WatchConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No configuration value was given
    #[error("missing config")]
    MissingConfig,

    /// A required field is absent or empty
    #[error("missing {0}")]
    MissingField(&'static str),

    /// `collections` resolved to no entries
    #[error("must be at least 1 collection")]
    EmptyCollections,

    /// The value could not be read as a configuration
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Validated, immutable description of what to watch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawWatchConfig")]
pub struct WatchConfig {
    uri: String,
    database: String,
    collections: Vec<String>,
    full_document: bool,
    scope: WatchScope,
}

impl WatchConfig {
    /// Creates a new builder for `WatchConfig`.
    #[must_use]
    pub fn builder() -> WatchConfigBuilder {
        WatchConfigBuilder::default()
    }

    /// Validates an untyped configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value is absent, is not an object,
    /// lacks `uri`, `database` (or `db`) or `collections`, or if
    /// `collections` resolves to no entries.
    pub fn from_value(value: Option<&Value>) -> Result<Self, ConfigError> {
        let value = match value {
            None | Some(Value::Null) => return Err(ConfigError::MissingConfig),
            Some(value) => value,
        };

        let raw =
            RawWatchConfig::deserialize(value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Connection descriptor handed to the source.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Name of the watched database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Normalized collection entries, in configured order.
    ///
    /// May contain the wildcard sentinel; see [`scope`](Self::scope).
    #[must_use]
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    /// Whether update events are enriched with the current document.
    #[must_use]
    pub fn full_document(&self) -> bool {
        self.full_document
    }

    /// Effective watch scope derived from [`collections`](Self::collections).
    #[must_use]
    pub fn scope(&self) -> &WatchScope {
        &self.scope
    }

    fn validate(
        uri: Option<String>,
        database: Option<String>,
        collections: Option<Vec<String>>,
        full_document: bool,
    ) -> Result<Self, ConfigError> {
        let uri = uri
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingField("uri"))?;
        let database = database
            .filter(|d| !d.is_empty())
            .ok_or(ConfigError::MissingField("database"))?;
        let collections = collections.ok_or(ConfigError::MissingField("collections"))?;

        let collections = normalize_collections(collections);
        if collections.is_empty() {
            return Err(ConfigError::EmptyCollections);
        }

        let scope = WatchScope::from_collections(&collections);

        Ok(Self {
            uri,
            database,
            collections,
            full_document,
            scope,
        })
    }
}

/// Trims entries, drops empty ones and removes duplicates, keeping first occurrences.
fn normalize_collections(collections: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(collections.len());
    for name in collections {
        let name = name.trim();
        if name.is_empty() || normalized.iter().any(|n| n == name) {
            continue;
        }
        normalized.push(name.to_string());
    }
    normalized
}

fn split_delimited(collections: &str) -> Vec<String> {
    collections.split(',').map(str::to_string).collect()
}

/// `collections` as it may appear in untyped input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CollectionsInput {
    List(Vec<String>),
    Delimited(String),
}

impl CollectionsInput {
    fn into_entries(self) -> Vec<String> {
        match self {
            Self::List(list) => list,
            Self::Delimited(s) => split_delimited(&s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWatchConfig {
    uri: Option<String>,

    #[serde(alias = "db")]
    database: Option<String>,

    collections: Option<CollectionsInput>,

    #[serde(default, alias = "fullDocument", alias = "fullDoc")]
    full_document_mode: bool,
}

impl TryFrom<RawWatchConfig> for WatchConfig {
    type Error = ConfigError;

    fn try_from(raw: RawWatchConfig) -> Result<Self, Self::Error> {
        Self::validate(
            raw.uri,
            raw.database,
            raw.collections.map(CollectionsInput::into_entries),
            raw.full_document_mode,
        )
    }
}

/// Builder for [`WatchConfig`].
#[derive(Debug, Default)]
pub struct WatchConfigBuilder {
    uri: Option<String>,
    database: Option<String>,
    collections: Option<Vec<String>>,
    full_document: bool,
}

impl WatchConfigBuilder {
    /// Sets the connection URI.
    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the collections to watch. Include `"*"` to watch all of them.
    #[must_use]
    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the collections from a comma-delimited list, e.g. `"users,orders"`.
    #[must_use]
    pub fn collections_str(mut self, collections: &str) -> Self {
        self.collections = Some(split_delimited(collections));
        self
    }

    /// Enables or disables full-document enrichment of updates.
    ///
    /// Default: disabled
    #[must_use]
    pub fn full_document(mut self, enabled: bool) -> Self {
        self.full_document = enabled;
        self
    }

    /// Builds the `WatchConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required field is missing or
    /// `collections` resolves to no entries.
    pub fn build(self) -> Result<WatchConfig, ConfigError> {
        WatchConfig::validate(
            self.uri,
            self.database,
            self.collections,
            self.full_document,
        )
    }
}

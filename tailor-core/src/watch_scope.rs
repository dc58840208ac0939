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

//! Watch scope for a tailed database.
//!
//! A pipeline either watches a fixed list of collections, or every
//! collection in the database. The latter is selected by listing the
//! [`WILDCARD`] sentinel among the configured collections; once present it
//! overrides any specific names.
//!
//! ```rust
//! use tailor_core::watch_scope::WatchScope;
//!
//! let scope = WatchScope::from_collections(&["users".to_string(), "*".to_string()]);
//! assert!(scope.is_all());
//!
//! let scope = WatchScope::from_collections(&["users".to_string()]);
//! assert_eq!(scope.collections(), Some(&["users".to_string()][..]));
//! ```

/// Collection name that selects every collection in the database.
pub const WILDCARD: &str = "*";

/// Defines which collections of the database are watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Watch the named collections only.
    ///
    /// Lookup handles for these collections are built once, right after the
    /// source connects.
    Collections(Vec<String>),

    /// Watch every collection in the database.
    ///
    /// Collections are discovered as their records appear, so lookup handles
    /// are resolved lazily.
    All,
}

impl WatchScope {
    /// Derives the scope from a normalized collection list.
    #[must_use]
    pub fn from_collections(collections: &[String]) -> Self {
        if collections.iter().any(|name| name == WILDCARD) {
            Self::All
        } else {
            Self::Collections(collections.to_vec())
        }
    }

    /// Returns `true` if every collection is watched.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns the watched collection names, or `None` when watching everything.
    #[must_use]
    pub fn collections(&self) -> Option<&[String]> {
        match self {
            Self::Collections(collections) => Some(collections.as_slice()),
            Self::All => None,
        }
    }

    /// Returns `true` if `name` is one of the explicitly watched collections.
    ///
    /// Always `false` for [`WatchScope::All`]; callers check [`is_all`](Self::is_all) first.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::Collections(collections) => collections.iter().any(|c| c == name),
            Self::All => false,
        }
    }

    /// Returns a human-readable description of the scope.
    ///
    /// ```rust
    /// use tailor_core::watch_scope::WatchScope;
    ///
    /// let scope = WatchScope::Collections(vec!["users".to_string(), "orders".to_string()]);
    /// assert_eq!(scope.description(), "2 collections");
    /// assert_eq!(WatchScope::All.description(), "all collections");
    /// ```
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Collections(collections) => {
                if collections.len() == 1 {
                    format!("1 collection ({})", collections[0])
                } else {
                    format!("{} collections", collections.len())
                }
            }
            Self::All => "all collections".to_string(),
        }
    }
}

impl std::fmt::Display for WatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collections(collections) => write!(f, "Collections({:?})", collections),
            Self::All => write!(f, "All"),
        }
    }
}

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

//! Full-document enrichment of update events.
//!
//! An update record only carries the update descriptor (`$set`, `$unset`,
//! ...). In full-document mode the pipeline reads the document's current
//! state by `_id` and attaches it to the event. Each lookup is independent:
//! there is no retry, no deduplication between lookups for the same
//! document, and no ordering between lookups in flight.

use crate::event::{ChangeEvent, OplogEntry};
use crate::metrics;
use crate::source::{CollectionLookup, OplogSource, SourceError};
use crate::watch_scope::WatchScope;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that prevent an update from being enriched.
///
/// The originating update is dropped; it is not retried or queued.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// The update selector carries no `_id`
    #[error("Update on '{}' has no _id in its selector", .entry.namespace)]
    MissingDocumentId {
        /// The dropped update
        entry: Box<OplogEntry>,
    },

    /// No lookup handle exists for the collection
    #[error("No lookup handle for collection '{collection}'")]
    UnknownCollection {
        /// Collection named by the update's namespace
        collection: String,
        /// The dropped update
        entry: Box<OplogEntry>,
    },

    /// The lookup itself failed
    #[error("Lookup of {id} in '{collection}' failed: {source}")]
    Lookup {
        /// Collection the lookup ran against
        collection: String,
        /// Rendered `_id` of the target document
        id: String,
        /// The dropped update
        entry: Box<OplogEntry>,
        /// The underlying source error
        #[source]
        source: SourceError,
    },
}

impl EnrichmentError {
    /// The update that could not be enriched.
    ///
    /// Lets callers layer their own retry on top of the pipeline.
    #[must_use]
    pub fn entry(&self) -> &OplogEntry {
        match self {
            Self::MissingDocumentId { entry }
            | Self::UnknownCollection { entry, .. }
            | Self::Lookup { entry, .. } => entry,
        }
    }
}

/// Per-collection lookup handles owned by the pipeline.
///
/// For a fixed collection list the handles are built once, right after the
/// source connects, and never change. When watching every collection they
/// are resolved lazily the first time an update for a collection needs one.
pub struct LookupHandles {
    handles: HashMap<String, Arc<dyn CollectionLookup>>,
    lazy: bool,
}

impl LookupHandles {
    /// Builds the handles for `scope` from a connected source.
    pub fn build<S: OplogSource + ?Sized>(scope: &WatchScope, source: &S) -> Self {
        match scope.collections() {
            Some(collections) => {
                let handles = collections
                    .iter()
                    .map(|name| (name.clone(), source.collection(name)))
                    .collect();
                Self {
                    handles,
                    lazy: false,
                }
            }
            None => Self {
                handles: HashMap::new(),
                lazy: true,
            },
        }
    }

    /// Returns the handle for `collection`, creating it when resolving lazily.
    pub fn resolve<S: OplogSource + ?Sized>(
        &mut self,
        collection: &str,
        source: &S,
    ) -> Option<Arc<dyn CollectionLookup>> {
        if let Some(handle) = self.handles.get(collection) {
            return Some(Arc::clone(handle));
        }

        if !self.lazy {
            return None;
        }

        debug!(collection, "Resolving lookup handle");
        let handle = source.collection(collection);
        self.handles
            .insert(collection.to_string(), Arc::clone(&handle));
        Some(handle)
    }

    /// Number of handles currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no handle has been built yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for LookupHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handles.keys().collect();
        names.sort();
        f.debug_struct("LookupHandles")
            .field("collections", &names)
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// Looks up the current document for an update record.
///
/// A missing document (deleted between the write and the lookup) is not an
/// error: the event is produced with `document` left empty.
///
/// # Errors
///
/// Returns [`EnrichmentError`] if the selector has no `_id` or the lookup fails.
pub async fn enrich(
    entry: OplogEntry,
    lookup: &dyn CollectionLookup,
) -> Result<ChangeEvent, EnrichmentError> {
    let Some(id) = entry.target_id().cloned() else {
        return Err(EnrichmentError::MissingDocumentId {
            entry: Box::new(entry),
        });
    };

    let collection = lookup.name().to_string();
    trace!(collection = %collection, id = %id, "Looking up current document");

    let result = {
        let _timer = metrics::LookupTimer::start(collection.as_str());
        lookup.find_by_id(&id).await
    };

    match result {
        Ok(document) => {
            if document.is_none() {
                debug!(collection = %collection, id = %id, "Document no longer exists");
            }
            Ok(ChangeEvent::with_document(entry, document))
        }
        Err(source) => Err(EnrichmentError::Lookup {
            collection,
            id: id.to_string(),
            entry: Box::new(entry),
            source,
        }),
    }
}

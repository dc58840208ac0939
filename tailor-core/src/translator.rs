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

//! Translation of matched oplog records into change events.

use crate::config::WatchConfig;
use crate::event::{ChangeEvent, OplogEntry};

/// Outcome of translating one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// The event can be emitted as is.
    Ready(ChangeEvent),

    /// An update that must be enriched with the current document before emission.
    NeedsDocument(OplogEntry),
}

/// Converts matched oplog records into [`ChangeEvent`]s.
///
/// Inserts, deletes and commands are wrapped directly. Updates are wrapped
/// too, unless full-document mode is on, in which case they are handed back
/// for enrichment.
#[derive(Debug, Clone, Copy)]
pub struct ChangeTranslator {
    full_document: bool,
}

impl ChangeTranslator {
    /// Creates a translator for the given configuration.
    #[must_use]
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            full_document: config.full_document(),
        }
    }

    /// Translates one record. Never performs I/O.
    #[must_use]
    pub fn translate(&self, entry: OplogEntry) -> Translation {
        if self.full_document && entry.is_update() {
            Translation::NeedsDocument(entry)
        } else {
            Translation::Ready(ChangeEvent::new(entry))
        }
    }
}

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

//! Pipeline orchestration from an oplog source to subscribers.
//!
//! The [`Pipeline`] owns the lifecycle of one tailing session:
//!
//! - **Connect**: drive the [`OplogSource`] in a background task
//! - **Filter**: drop records outside the watched namespace
//! - **Translate**: turn records into [`ChangeEvent`]s
//! - **Enrich**: fetch the current document for updates in full-document mode
//! - **Teardown**: stop consuming, close the source, silence all emissions
//!
//! Everything a subscriber sees arrives on one [`PipelineEvents`] channel,
//! in the order it was emitted. Events that do not need enrichment keep the
//! order of the oplog; enriched updates are emitted when their lookup
//! completes and may overtake or trail later records.
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tailor_core::pipeline::{Pipeline, PipelineEvent};
//! # use tailor_core::source::OplogSource;
//!
//! # async fn example(source: impl OplogSource) -> Result<(), Box<dyn std::error::Error>> {
//! let config = json!({
//!     "uri": "mongodb://localhost:27017",
//!     "database": "shop",
//!     "collections": "orders,users",
//!     "fullDocument": true,
//! });
//!
//! let (mut pipeline, mut events) = Pipeline::create(Some(&config), source)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PipelineEvent::Connected => println!("tailing"),
//!         PipelineEvent::Change(change) => println!("{:?}", change),
//!         PipelineEvent::Error(e) => eprintln!("{e}"),
//!         PipelineEvent::End => break,
//!     }
//! }
//!
//! pipeline.destroy().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, WatchConfig};
use crate::enricher::{self, EnrichmentError, LookupHandles};
use crate::event::{ChangeEvent, ConversionError, OplogEntry};
use crate::matcher::NamespaceMatcher;
use crate::metrics::{self, PipelineStatus};
use crate::source::{CollectionLookup, OplogSource, SourceError};
use crate::translator::{ChangeTranslator, Translation};
use bson::Document;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Configuration accepted, the driver task has not started yet.
    Created,

    /// Connecting to the source. A pipeline whose connect failed stays here.
    Connecting,

    /// Connected and consuming the oplog.
    Connected,

    /// Torn down. Terminal.
    Destroyed,
}

impl PipelineState {
    fn status(self) -> PipelineStatus {
        match self {
            Self::Created => PipelineStatus::Created,
            Self::Connecting => PipelineStatus::Connecting,
            Self::Connected => PipelineStatus::Connected,
            Self::Destroyed => PipelineStatus::Destroyed,
        }
    }
}

/// Notification delivered to subscribers.
#[derive(Debug)]
pub enum PipelineEvent {
    /// The source connected and lookup handles are ready.
    Connected,

    /// A change on a watched collection.
    Change(ChangeEvent),

    /// A failure. The pipeline keeps running; the affected record is dropped.
    Error(PipelineError),

    /// The oplog stream ended. No further changes will follow.
    End,
}

impl PipelineEvent {
    /// Returns the change carried by this event, if any.
    #[must_use]
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }

    /// Returns `true` for [`PipelineEvent::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Errors reported on the subscriber channel.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source failed to connect
    #[error("Connect failed: {0}")]
    Connect(#[source] SourceError),

    /// The oplog stream reported a fault
    #[error("Oplog stream error: {0}")]
    Stream(#[source] SourceError),

    /// A raw record could not be read as an oplog entry
    #[error("Invalid oplog record: {0}")]
    Conversion(#[from] ConversionError),

    /// An update could not be enriched and was dropped
    #[error("Enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),
}

impl PipelineError {
    /// Low-cardinality label used for the `error_type` metric.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Stream(_) => "stream",
            Self::Conversion(_) => "conversion",
            Self::Enrichment(_) => "enrichment",
        }
    }
}

/// Sending half shared by the driver and enrichment tasks.
///
/// Once the pipeline is destroyed nothing is forwarded, including the
/// results of lookups that were still in flight.
#[derive(Clone)]
struct Emitter {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    destroyed: Arc<AtomicBool>,
}

impl Emitter {
    /// Forwards `event` unless the pipeline is destroyed. Returns whether it was sent.
    fn emit(&self, event: PipelineEvent) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            trace!("Suppressing event after destroy");
            return false;
        }

        if self.tx.send(event).is_err() {
            trace!("Subscriber channel closed, discarding event");
            return false;
        }

        true
    }

    fn emit_change(&self, collection: &str, change: ChangeEvent) {
        let operation = change.log.operation.as_str().to_string();
        if self.emit(PipelineEvent::Change(change)) {
            metrics::increment_changes_emitted(collection, &operation);
        }
    }

    fn emit_error(&self, error: PipelineError) {
        let category = error.category();
        if self.emit(PipelineEvent::Error(error)) {
            metrics::increment_errors(category);
        }
    }
}

/// Receiving half of a pipeline's event channel.
///
/// Yields `None` once the pipeline is destroyed, even if events were still
/// queued at that point.
pub struct PipelineEvents {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
    shutdown_rx: broadcast::Receiver<()>,
    destroyed: Arc<AtomicBool>,
}

impl PipelineEvents {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.shutdown_rx.recv() => None,
            event = self.rx.recv() => event,
        };

        if self.destroyed.load(Ordering::Acquire) {
            None
        } else {
            event
        }
    }

    /// Converts the receiver into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> + Send + Unpin {
        futures::stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
        .boxed()
    }
}

impl std::fmt::Debug for PipelineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEvents")
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Tails an oplog source and reports changes for the watched collections.
pub struct Pipeline {
    /// Validated configuration
    config: Arc<WatchConfig>,

    /// Current lifecycle state
    state: Arc<RwLock<PipelineState>>,

    /// Set once on destroy, checked before every emission
    destroyed: Arc<AtomicBool>,

    /// Shutdown sender (taken on destroy)
    shutdown_tx: Option<broadcast::Sender<()>>,

    /// Driver task handle
    driver: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Validates `config` and starts connecting `source`.
    ///
    /// Returns as soon as the configuration is accepted; connection happens
    /// in the background and is reported as [`PipelineEvent::Connected`] or
    /// [`PipelineEvent::Error`]. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is absent or invalid. No
    /// I/O is attempted in that case.
    pub fn create<S: OplogSource>(
        config: Option<&Value>,
        source: S,
    ) -> Result<(Self, PipelineEvents), ConfigError> {
        let config = WatchConfig::from_value(config)?;
        Ok(Self::with_config(config, source))
    }

    /// Starts connecting `source` with an already validated configuration.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_config<S: OplogSource>(config: WatchConfig, source: S) -> (Self, PipelineEvents) {
        info!(
            database = %config.database(),
            scope = %config.scope().description(),
            full_document = config.full_document(),
            "Creating pipeline"
        );
        metrics::set_pipeline_status(PipelineStatus::Created);

        let config = Arc::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let destroyed = Arc::new(AtomicBool::new(false));

        let state = Arc::new(RwLock::new(PipelineState::Created));

        let driver = Driver {
            matcher: NamespaceMatcher::new(&config),
            translator: ChangeTranslator::new(&config),
            config: Arc::clone(&config),
            source,
            state: Arc::clone(&state),
            emitter: Emitter {
                tx,
                destroyed: Arc::clone(&destroyed),
            },
            shutdown_rx: shutdown_tx.subscribe(),
        };
        let handle = tokio::spawn(driver.run());

        let events = PipelineEvents {
            rx,
            shutdown_rx,
            destroyed: Arc::clone(&destroyed),
        };

        let pipeline = Self {
            config,
            state,
            destroyed,
            shutdown_tx: Some(shutdown_tx),
            driver: Some(handle),
        };

        (pipeline, events)
    }

    /// Tears the pipeline down.
    ///
    /// Stops consuming the oplog, closes the source and waits for the
    /// driver task to finish. From the moment this is called no further
    /// event reaches subscribers, including results of lookups still in
    /// flight. Calling it again is a no-op.
    #[instrument(skip(self), fields(database = %self.config.database()))]
    pub async fn destroy(&mut self) {
        {
            let mut state = self.state.write().await;
            if *state == PipelineState::Destroyed {
                debug!("Pipeline already destroyed");
                return;
            }
            self.destroyed.store(true, Ordering::Release);
            debug!(from = ?*state, to = ?PipelineState::Destroyed, "Pipeline state transition");
            *state = PipelineState::Destroyed;
            metrics::set_pipeline_status(PipelineStatus::Destroyed);
        }

        info!("Destroying pipeline");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!(?e, "Pipeline driver panicked");
            }
        }

        info!("Pipeline destroyed");
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> PipelineState {
        *self.state.read().await
    }

    /// Returns `true` once [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// The configuration this pipeline was created with.
    #[must_use]
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            debug!("Pipeline dropped without destroy, signalling shutdown");
            self.destroyed.store(true, Ordering::Release);
            let _ = tx.send(());
        }
    }
}

/// Background task that owns the source for the pipeline's lifetime.
struct Driver<S> {
    config: Arc<WatchConfig>,
    source: S,
    matcher: NamespaceMatcher,
    translator: ChangeTranslator,
    state: Arc<RwLock<PipelineState>>,
    emitter: Emitter,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S: OplogSource> Driver<S> {
    #[instrument(skip(self), fields(database = %self.config.database()))]
    async fn run(mut self) {
        if !Self::transition(&self.state, PipelineState::Connecting).await {
            self.teardown().await;
            return;
        }
        info!("Connecting to oplog source");

        let connected = tokio::select! {
            _ = self.shutdown_rx.recv() => None,
            result = self.source.connect(&self.config) => Some(result),
        };

        let mut stream = match connected {
            None => {
                debug!("Shutdown requested while connecting");
                self.teardown().await;
                return;
            }
            Some(Err(e)) => {
                error!(error = %e, "Failed to connect to oplog source");
                self.emitter.emit_error(PipelineError::Connect(e));
                let _ = self.shutdown_rx.recv().await;
                self.teardown().await;
                return;
            }
            Some(Ok(stream)) => stream,
        };

        let mut lookups = LookupHandles::build(self.config.scope(), &self.source);

        if !Self::transition(&self.state, PipelineState::Connected).await {
            drop(stream);
            self.teardown().await;
            return;
        }

        info!(
            scope = %self.config.scope(),
            lookup_handles = lookups.len(),
            "Connected, tailing oplog"
        );
        self.emitter.emit(PipelineEvent::Connected);

        loop {
            let item = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(raw)) => self.handle_record(raw, &mut lookups),
                Some(Err(e)) => {
                    warn!(error = %e, "Oplog stream reported an error");
                    self.emitter.emit_error(PipelineError::Stream(e));
                }
                None => {
                    info!("Oplog stream ended");
                    self.emitter.emit(PipelineEvent::End);
                    let _ = self.shutdown_rx.recv().await;
                    break;
                }
            }
        }

        drop(stream);
        self.teardown().await;
    }

    /// Filters, translates and either emits or enriches one raw record.
    fn handle_record(&self, raw: Document, lookups: &mut LookupHandles) {
        let entry = match OplogEntry::try_from(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping malformed oplog record");
                self.emitter.emit_error(e.into());
                return;
            }
        };

        if !self.matcher.is_watched(&entry) {
            trace!(namespace = %entry.namespace, "Skipping unwatched record");
            metrics::increment_records_filtered();
            return;
        }

        let collection = self.matcher.collection_name(&entry.namespace).to_string();

        match self.translator.translate(entry) {
            Translation::Ready(change) => {
                debug!(
                    collection = %collection,
                    operation = %change.log.operation,
                    "Emitting change"
                );
                self.emitter.emit_change(&collection, change);
            }
            Translation::NeedsDocument(entry) => match lookups.resolve(&collection, &self.source) {
                Some(lookup) => self.spawn_enrichment(collection, entry, lookup),
                None => {
                    warn!(collection = %collection, "No lookup handle for update");
                    self.emitter.emit_error(
                        EnrichmentError::UnknownCollection {
                            collection,
                            entry: Box::new(entry),
                        }
                        .into(),
                    );
                }
            },
        }
    }

    /// Looks up the current document in a detached task.
    ///
    /// The task is not tracked; destroy does not wait for or cancel it, the
    /// emitter just drops its result.
    fn spawn_enrichment(
        &self,
        collection: String,
        entry: OplogEntry,
        lookup: Arc<dyn CollectionLookup>,
    ) {
        let emitter = self.emitter.clone();
        metrics::increment_lookups_in_flight();

        tokio::spawn(async move {
            let result = enricher::enrich(entry, lookup.as_ref()).await;
            metrics::decrement_lookups_in_flight();

            match result {
                Ok(change) => emitter.emit_change(&collection, change),
                Err(e) => {
                    warn!(collection = %collection, error = %e, "Dropping update after failed enrichment");
                    emitter.emit_error(e.into());
                }
            }
        });
    }

    /// Moves to `next` unless the pipeline was destroyed in the meantime.
    async fn transition(state: &RwLock<PipelineState>, next: PipelineState) -> bool {
        let mut state = state.write().await;
        if *state == PipelineState::Destroyed {
            debug!(to = ?next, "Pipeline destroyed, skipping state transition");
            return false;
        }
        debug!(from = ?*state, to = ?next, "Pipeline state transition");
        *state = next;
        metrics::set_pipeline_status(next.status());
        true
    }

    async fn teardown(&mut self) {
        debug!("Closing oplog source");
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close oplog source cleanly");
        }
    }
}

//! Tailor Core - oplog tailing and change translation
//!
//! This crate turns a MongoDB oplog into a stream of change notifications
//! for the collections an application cares about. It includes oplog
//! record types, namespace matching, full-document enrichment and the
//! pipeline that ties them together.
//!
//! # Key Components
//!
//! - **Configuration**: [`config`] validates the watch configuration
//! - **Events**: [`event`] defines oplog records and change events
//! - **Matching**: [`matcher`] decides which records belong to watched collections
//! - **Translation**: [`translator`] and [`enricher`] build change events
//! - **Sources**: [`source`] defines the transport the pipeline drives
//! - **Pipeline**: [`pipeline`] orchestrates connect, filter, emit and teardown
//!
//! # Example
//!
//! ```rust
//! use tailor_core::event::{ChangeEvent, Operation};
//!
//! fn process_change(change: ChangeEvent) {
//!     match change.log.operation {
//!         Operation::Insert => println!("New document inserted"),
//!         Operation::Update => println!("Document updated"),
//!         Operation::Delete => println!("Document deleted"),
//!         _ => println!("Other operation"),
//!     }
//! }
//! ```

pub mod config;
pub mod enricher;
pub mod event;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod translator;
pub mod watch_scope;

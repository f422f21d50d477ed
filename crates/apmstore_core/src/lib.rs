//! # apmstore Core
//!
//! Storage write engine for apmstore.
//!
//! This crate provides:
//! - [`StorageWriter`]: the asynchronous write pipeline of one open storage
//! - The indexing tree ([`IndexingTreeHandler`]), which records where every
//!   written record landed and rotates itself into persisted generations
//! - [`StorageManager`]: the storage lifecycle state machine and the
//!   recording mode
//! - Data processors that filter, extract and aggregate records on their
//!   way to a writer
//!
//! ## Write path
//!
//! ```text
//! caller ──▶ processors ──▶ StorageWriter::write ──▶ write pool
//!                                                      │
//!        IndexingTree::start_write ◀───────────────────┤
//!        Serializer::serialize     ◀───────────────────┤
//!        ChannelWriter::write      ◀───────────────────┘
//!                  │
//!                  └──▶ completion ──▶ commit or roll back the descriptor
//! ```
//!
//! Failures of a single record never fail the writer: they surface on that
//! record's [`WriteHandle`] as a [`WriteFailure`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod disk;
mod drain;
mod error;
mod handle;
pub mod index;
mod layout;
mod manager;
pub mod processor;
mod record;
mod recorder;
mod scheduler;
mod source;
mod status;
mod storage;
mod writer;

pub use config::StorageConfig;
pub use disk::DiskSpaceGate;
pub use error::{CoreError, CoreResult, StorageErrorCode};
pub use handle::{wait_all, WriteFailure, WriteHandle, WriteOutcome};
pub use index::{Descriptor, IndexEntry, IndexingTreeHandler, PersistedIndex};
pub use layout::{StorageRoot, CHANNEL_EXTENSION, INDEX_EXTENSION, METADATA_EXTENSION};
pub use manager::StorageManager;
pub use processor::DataProcessor;
pub use record::{DataRecord, KindTag, RecordId, RecordKind};
pub use recorder::{RecordingProperties, RecordingState, StorageRecorder};
pub use scheduler::Scheduler;
pub use source::{MemoryRecordSource, RecordSource};
pub use status::{WritingStatus, WritingStatusTracker};
pub use storage::{StorageData, StorageState};
pub use writer::{RecordWriter, StorageWriter, WriterServices, WriterStats};

/// Version of this crate, recorded in the metadata of new storages.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

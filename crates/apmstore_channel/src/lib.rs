//! # apmstore Channel
//!
//! Channel layer for apmstore.
//!
//! A channel is an addressable, append-only byte sink. Storage writers hand
//! serialized records to a [`ChannelWriter`] together with the channel path,
//! and are told the final offset and length through a completion callback
//! once the bytes are placed.
//!
//! Channels are **opaque byte stores** - they do not interpret the records
//! they hold. Locating a record inside a channel is the job of the indexing
//! tree in `apmstore_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing
//! - [`FileBackend`] - For channel files on disk
//!
//! ## Example
//!
//! ```rust
//! use apmstore_channel::{ChannelManager, ChannelWriter};
//! use bytes::Bytes;
//! use std::path::Path;
//! use std::sync::mpsc;
//!
//! let channels = ChannelManager::in_memory();
//! let (tx, rx) = mpsc::channel();
//! channels.write(
//!     Bytes::from_static(b"record"),
//!     Path::new("1.itdata"),
//!     Box::new(move |result| tx.send(result).unwrap()),
//! );
//! let (offset, length) = rx.recv().unwrap().unwrap();
//! assert_eq!((offset, length), (0, 6));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod manager;
mod memory;

pub use backend::ChannelBackend;
pub use error::{ChannelError, ChannelResult};
pub use file::FileBackend;
pub use manager::{ChannelManager, ChannelWriter, WriteCallback};
pub use memory::InMemoryBackend;

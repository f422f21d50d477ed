//! Indexing tree: where every written record physically landed.
//!
//! A write task reserves an empty [`Descriptor`] from the current
//! [`IndexGeneration`] before any I/O, and the descriptor is filled in with
//! the real offset and length once the channel write completes. When the
//! current generation grows past its size threshold the
//! [`IndexingTreeHandler`] swaps in a fresh one and persists the old one as
//! soon as every task that reserved from it has finished.

mod descriptor;
mod generation;
mod handler;
mod persist;

pub use descriptor::Descriptor;
pub use generation::IndexGeneration;
pub use handler::{IndexingTreeHandler, TaskId};
pub use persist::{IndexEntry, PersistedIndex};

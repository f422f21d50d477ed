//! # apmstore Testkit
//!
//! Test utilities for apmstore.
//!
//! This crate provides:
//! - Storage manager fixtures on temporary roots
//! - Serializers and channel writers that fail on demand
//! - Property-based record generators using proptest
//! - A concurrent write stress driver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apmstore_testkit::prelude::*;
//!
//! #[test]
//! fn writes_land_in_storage() {
//!     let env = TestStorageManager::new();
//!     let id = env.create_storage("test", None).unwrap().id().to_string();
//!     env.write_to_storage(&id, &timer_records(1..=10, 1), Vec::new(), true).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;

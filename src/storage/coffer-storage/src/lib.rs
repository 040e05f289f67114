//! # Coffer Storage
//!
//! Storage abstraction layer for Coffer backends.
//!
//! The key management core persists key records, grants and grant tombstones
//! as opaque byte values under slash-separated keys. Backends only need to
//! implement [`StorageBackend`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;

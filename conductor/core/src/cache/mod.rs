#![allow(missing_docs)]
//! Response Cache
//!
//! Content-addressed storage of generated responses, one keyspace per
//! modality. A miss is a normal outcome (`None`), never an error.
//!
//! - [`keys`]: SHA-256 key derivation over output-affecting request fields
//! - [`store`]: the TTL/capacity-bounded store and its statistics

pub mod keys;
pub mod store;

pub use keys::{CacheKey, CacheableRequest, CachedResponse, KeyBuilder};
pub use store::{CacheEntry, CacheStats, ResponseCache, EVICTION_FRACTION};

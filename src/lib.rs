//! Deterministic, content-addressed function-result caching.
//!
//! This crate memoizes the result of a function call under a fingerprint
//! derived from the callable's identity and its arguments. Two disciplines
//! are supported:
//!
//! - **Value caching** ([`decorator::CacheValue`] / [`decorator::AsyncCacheValue`]):
//!   the return value is serialized, stored in a pluggable
//!   [`storage::Storage`] backend, and deserialized fresh on every hit.
//! - **Reference caching** ([`reference_cache::ReferenceCache`] /
//!   [`reference_cache::AsyncReferenceCache`]): the return value is stored,
//!   unserialized, in a process-wide singleton registry; every hit returns a
//!   clone of the same `Arc`.
//!
//! Both disciplines share the same fingerprinting engine ([`hash`]) and
//! cache-key construction ([`key`]).

pub mod decorator;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod hash;
pub mod key;
pub mod reference_cache;
pub mod storage;

pub use decorator::{AsyncCacheValue, CacheValue};
pub use error::{CacheError, Result, UnhashableTypeError};
pub use hash::{Encoded, Fingerprint, Reduce, TypeEncoders};
pub use key::{Args, FunctionId, Named};
pub use reference_cache::{AsyncReferenceCache, ReferenceCache, get_references};

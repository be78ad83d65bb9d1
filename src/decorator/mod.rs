//! Value-cache decorators: bind a function to a [`crate::storage::Storage`]
//! instance and drive the lookup/miss/populate protocol.

pub mod async_value;
pub mod value;

pub use async_value::AsyncCacheValue;
pub use value::CacheValue;

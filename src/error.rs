//! Error taxonomy for the cache.
//!
//! Mirrors the exception hierarchy of the system this crate's design is based
//! on: a root error type with two caller-facing variants raised by the key
//! builder (`UnhashableParamError`, `UnserializableReturnValueError`) and a
//! catch-all for backend/storage failures.

use derive_more::{Display, Error, From};

/// Raised internally by the hasher core when a value matches no fingerprint
/// rule. Always converted into [`CacheError::UnhashableParam`] before it
/// reaches a caller.
#[derive(Debug, Display, Error)]
#[display("no fingerprint rule matches type `{type_name}`")]
pub struct UnhashableTypeError {
    pub type_name: &'static str,
}

/// The umbrella error type returned by every public operation in this crate.
#[derive(Debug, Display, Error, From)]
pub enum CacheError {
    /// A single call argument could not be fingerprinted.
    #[display(
        "argument `{param_name}` of type `{type_name}` could not be hashed for caching; \
         prefix its name with `_` to exclude it, or register a type encoder for `{type_name}`"
    )]
    UnhashableParam {
        param_name: &'static str,
        type_name: &'static str,
        #[error(source)]
        cause: UnhashableTypeError,
    },

    /// The function's return value could not be serialized for value caching.
    #[display(
        "return value of type `{type_name}` could not be serialized for caching; \
         consider reference caching instead"
    )]
    UnserializableReturnValue {
        type_name: &'static str,
        #[error(source)]
        cause: serde_json::Error,
    },

    /// A storage backend I/O failure, or a failure decoding previously stored
    /// bytes.
    #[display("cache backend operation failed: {cause}")]
    #[from(ignore)]
    Backend {
        #[error(source)]
        cause: color_eyre::Report,
    },

    /// A storage instance's one-time setup failed permanently. Never retried.
    #[display("cache storage is improperly configured: {message}")]
    ImproperlyConfigured { message: String },

    /// A config value outside its accepted domain (e.g. a zero or negative
    /// expiry).
    #[display("invalid cache configuration: {message}")]
    InvalidConfig { message: String },
}

impl CacheError {
    pub fn backend(cause: impl Into<color_eyre::Report>) -> Self {
        CacheError::Backend {
            cause: cause.into(),
        }
    }

    pub fn improperly_configured(message: impl Into<String>) -> Self {
        CacheError::ImproperlyConfigured {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        CacheError::InvalidConfig {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

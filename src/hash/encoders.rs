//! Registry of user-supplied type encoders.
//!
//! A type encoder converts a value of some type `T` into a `serde_json::Value`
//! that the hasher then fingerprints in its place. This is how a caller hooks
//! an otherwise-unhashable type (e.g. a third-party struct with no
//! [`crate::hash::Fingerprint`] impl) into the fingerprinting engine without
//! this crate needing to know about it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::UnhashableTypeError;

type EncoderFn = Arc<
    dyn Fn(&dyn Any) -> Result<serde_json::Value, UnhashableTypeError> + Send + Sync,
>;

/// An ordered-by-insertion registry mapping a concrete `TypeId` to a closure
/// that reduces a value of that type to a [`serde_json::Value`].
#[derive(Clone, Default)]
pub struct TypeEncoders {
    encoders: HashMap<TypeId, EncoderFn>,
}

impl TypeEncoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an encoder for `T`. A later call for the same `T` replaces
    /// the previous encoder.
    pub fn register<T, F>(mut self, encoder: F) -> Self
    where
        T: Any + 'static,
        F: Fn(&T) -> serde_json::Value + Send + Sync + 'static,
    {
        let wrapped: EncoderFn = Arc::new(move |value: &dyn Any| {
            let value = value
                .downcast_ref::<T>()
                .expect("type encoder invoked with mismatched TypeId");
            Ok(encoder(value))
        });
        self.encoders.insert(TypeId::of::<T>(), wrapped);
        self
    }

    /// Register a fallible encoder for `T`.
    pub fn register_fallible<T, F>(mut self, encoder: F) -> Self
    where
        T: Any + 'static,
        F: Fn(&T) -> Result<serde_json::Value, UnhashableTypeError> + Send + Sync + 'static,
    {
        let wrapped: EncoderFn = Arc::new(move |value: &dyn Any| {
            let value = value
                .downcast_ref::<T>()
                .expect("type encoder invoked with mismatched TypeId");
            encoder(value)
        });
        self.encoders.insert(TypeId::of::<T>(), wrapped);
        self
    }

    /// Returns `None` if no encoder is registered for `T`; otherwise the
    /// encoder's result (which may itself be an error).
    pub fn encode<T: Any>(
        &self,
        value: &T,
    ) -> Option<Result<serde_json::Value, UnhashableTypeError>> {
        let encoder = self.encoders.get(&TypeId::of::<T>())?;
        Some(encoder(value as &dyn Any))
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }
}

impl std::fmt::Debug for TypeEncoders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEncoders")
            .field("registered", &self.encoders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Opaque(i32);

    #[test]
    fn registered_encoder_is_used() {
        let encoders = TypeEncoders::new().register::<Opaque, _>(|v| serde_json::json!(v.0));
        let result = encoders.encode(&Opaque(7)).unwrap().unwrap();
        assert_eq!(result, serde_json::json!(7));
    }

    #[test]
    fn unregistered_type_returns_none() {
        let encoders = TypeEncoders::new();
        assert!(encoders.encode(&Opaque(7)).is_none());
    }
}

//! Function identity and cache-key construction.
//!
//! A cache key is the concatenation of a [`FunctionId`] (identifies the
//! decorated callable) and an argument digest (identifies one call to it).
//! Arguments are supplied as a tuple implementing [`Args`]; wrap an element
//! in [`Named`] to give it an explicit parameter name, which also makes it
//! eligible for underscore-prefix exclusion.

use std::panic::Location;

use md5::{Digest, Md5};

use crate::error::{CacheError, UnhashableTypeError};
use crate::hash::{Fingerprint, HashContext, TypeEncoders, fingerprint};

/// A stable identity for a decorated callable.
///
/// Derived from the callable's fully qualified type name
/// (`std::any::type_name`, unique per `fn` item and per monomorphized
/// closure type) and the source location at which it was wrapped, captured
/// via `#[track_caller]`. This is this crate's analogue of "changes when the
/// function's source changes": editing the wrapped function's body does not
/// change its `type_name`, but moving the call site that performs the
/// wrapping does.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId {
    digest: [u8; 16],
}

impl FunctionId {
    /// Compute the identity of `F`, anchored at the caller's source location.
    #[track_caller]
    pub fn of<F>() -> Self {
        let location = Location::caller();
        let type_name = std::any::type_name::<F>();

        let mut hasher = Md5::new();
        hasher.update(type_name.as_bytes());
        hasher.update(b"@");
        hasher.update(location.file().as_bytes());
        hasher.update(b":");
        hasher.update(location.line().to_le_bytes());
        hasher.update(b":");
        hasher.update(location.column().to_le_bytes());

        FunctionId {
            digest: hasher.finalize().into(),
        }
    }

    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl std::fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionId({})", self.hex())
    }
}

/// Wraps an argument with an explicit parameter name.
///
/// Names beginning with `_` are excluded from the argument digest, mirroring
/// the convention that a leading underscore marks a parameter as
/// caching-irrelevant. Arguments not wrapped in `Named` are always hashed
/// under no name, matching the treatment of positional arguments.
pub struct Named<T>(pub &'static str, pub T);

/// One element of an argument tuple: an optionally-named, fingerprintable
/// value.
pub trait ArgPair {
    fn param_name(&self) -> Option<&'static str> {
        None
    }

    fn type_name(&self) -> &'static str;

    fn fingerprint_into(&self, ctx: &mut HashContext) -> Result<[u8; 16], UnhashableTypeError>;
}

impl<T: Fingerprint> ArgPair for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fingerprint_into(&self, ctx: &mut HashContext) -> Result<[u8; 16], UnhashableTypeError> {
        fingerprint(self, ctx)
    }
}

impl<T: Fingerprint> ArgPair for Named<T> {
    fn param_name(&self) -> Option<&'static str> {
        Some(self.0)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fingerprint_into(&self, ctx: &mut HashContext) -> Result<[u8; 16], UnhashableTypeError> {
        fingerprint(&self.1, ctx)
    }
}

/// A tuple of [`ArgPair`]s representing one call's arguments.
pub trait Args {
    /// Fingerprint every non-excluded argument, in order, into one byte
    /// string.
    fn hash_into(&self, ctx: &mut HashContext) -> Result<Vec<u8>, CacheError>;
}

impl Args for () {
    fn hash_into(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, CacheError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_args_tuple {
    ($($idx:tt : $t:ident),+) => {
        impl<$($t: ArgPair),+> Args for ($($t,)+) {
            fn hash_into(&self, ctx: &mut HashContext) -> Result<Vec<u8>, CacheError> {
                let mut out = Vec::new();
                $(
                    let pair = &self.$idx;
                    let excluded = pair.param_name().is_some_and(|name| name.starts_with('_'));
                    if !excluded {
                        let digest = pair.fingerprint_into(ctx).map_err(|cause| {
                            CacheError::UnhashableParam {
                                param_name: pair.param_name().unwrap_or("<positional>"),
                                type_name: pair.type_name(),
                                cause,
                            }
                        })?;
                        out.extend_from_slice(&digest);
                    }
                )+
                Ok(out)
            }
        }
    };
}

impl_args_tuple!(0: A0);
impl_args_tuple!(0: A0, 1: A1);
impl_args_tuple!(0: A0, 1: A1, 2: A2);
impl_args_tuple!(0: A0, 1: A1, 2: A2, 3: A3);
impl_args_tuple!(0: A0, 1: A1, 2: A2, 3: A3, 4: A4);
impl_args_tuple!(0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5);
impl_args_tuple!(0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5, 6: A6);
impl_args_tuple!(0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5, 6: A6, 7: A7);

/// Compose `function`'s identity with one call's arguments to produce the
/// textual cache key `"{function_hex}_{arg_hex}"`.
pub fn cache_key<A: Args>(
    function: FunctionId,
    args: &A,
    encoders: Option<&TypeEncoders>,
) -> Result<String, CacheError> {
    let mut ctx = HashContext::new(encoders);
    let arg_bytes = args.hash_into(&mut ctx)?;

    let mut hasher = Md5::new();
    hasher.update(&arg_bytes);
    let arg_digest: [u8; 16] = hasher.finalize().into();

    Ok(format!("{}_{}", function.hex(), hex::encode(arg_digest)))
}

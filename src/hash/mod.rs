//! Deterministic content-addressed fingerprinting.
//!
//! [`fingerprint`] turns an arbitrary [`Fingerprint`] value into a 128-bit
//! MD5 digest. Two values that are equal "for caching purposes" always
//! fingerprint to the same digest; the converse is not guaranteed to hold
//! across process versions, since fingerprints are integrity checks, not a
//! content-addressing scheme meant to survive a crate upgrade.
//!
//! Nested values are memoized within one [`HashContext`] (one call to
//! [`crate::key::value_key`]) and cycles through reference-counted wrappers
//! are broken with a fixed placeholder rather than overflowing the stack.

pub mod encoders;

use std::collections::HashMap;

use md5::{Digest, Md5};

use crate::error::UnhashableTypeError;
pub use encoders::TypeEncoders;

/// Bytes substituted for a value whose fingerprinting is already in progress
/// further up the call stack (a reference cycle).
const CYCLE_PLACEHOLDER: &[u8] = b"<cachex-cycle>";

/// A memoizable representation of a "simple" value, used as the key into a
/// [`HashContext`]'s memo table. Compound values (anything holding nested
/// [`Fingerprint`] values) return `None` from [`Fingerprint::memo_key`] and
/// are always recomputed, exactly as in the source algorithm this is
/// modeled on.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum MemoKey {
    Bytes(Vec<u8>),
    Str(String),
    Signed(i128),
    Unsigned(u128),
    Bool(bool),
    FloatBits(u64),
    Unit,
}

/// Per-call hashing session: the memo table, the in-progress identity stack
/// used for cycle detection, and the caller-supplied type encoder registry.
pub struct HashContext<'a> {
    memo: HashMap<(&'static str, MemoKey), [u8; 16]>,
    stack: Vec<usize>,
    encoders: Option<&'a TypeEncoders>,
}

impl<'a> HashContext<'a> {
    pub fn new(encoders: Option<&'a TypeEncoders>) -> Self {
        Self {
            memo: HashMap::new(),
            stack: Vec::new(),
            encoders,
        }
    }

    pub fn encoders(&self) -> Option<&'a TypeEncoders> {
        self.encoders
    }
}

/// A value that can be deterministically reduced to bytes for fingerprinting.
///
/// Implement this directly for types with an obvious canonical byte
/// representation. For everything else, wrap the value in [`Reduce`] (uses
/// `serde_json`) or [`Encoded`] (uses a caller-registered type encoder).
pub trait Fingerprint {
    /// A memo-table key for this value, if it is cheap to derive and equality
    /// on it implies an identical encoding. Compound values should return
    /// `None`.
    fn memo_key(&self) -> Option<MemoKey> {
        None
    }

    /// A stable identity for cycle detection (e.g. a pointer address).
    /// `None` means "cannot participate in a cycle".
    fn identity(&self) -> Option<usize> {
        None
    }

    /// Produce the canonical byte encoding of this value. May recurse into
    /// [`fingerprint`] for nested values.
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError>;
}

/// Fingerprint a value, consulting and updating `ctx`'s memo table and
/// cycle-detection stack.
pub fn fingerprint<T: Fingerprint + ?Sized>(
    value: &T,
    ctx: &mut HashContext,
) -> Result<[u8; 16], UnhashableTypeError> {
    let tname = std::any::type_name::<T>();
    let memo_key = value.memo_key();
    if let Some(key) = &memo_key {
        if let Some(digest) = ctx.memo.get(&(tname, key.clone())) {
            return Ok(*digest);
        }
    }

    let identity = value.identity();
    if let Some(id) = identity {
        if ctx.stack.contains(&id) {
            return Ok(digest_of(tname, CYCLE_PLACEHOLDER));
        }
        ctx.stack.push(id);
    }

    // Scoped so the identity is popped off the stack on every exit path,
    // including the early return from `?` inside `encode`.
    let result = (|| -> Result<[u8; 16], UnhashableTypeError> {
        let encoded = value.encode(ctx)?;
        Ok(digest_of(tname, &encoded))
    })();

    if identity.is_some() {
        ctx.stack.pop();
    }

    let digest = result?;
    if let Some(key) = memo_key {
        ctx.memo.insert((tname, key), digest);
    }
    Ok(digest)
}

fn digest_of(type_name: &str, encoded: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(type_name.as_bytes());
    hasher.update(b":");
    hasher.update(encoded);
    hasher.finalize().into()
}

fn unhashable<T>() -> UnhashableTypeError {
    UnhashableTypeError {
        type_name: std::any::type_name::<T>(),
    }
}

macro_rules! impl_fingerprint_signed {
    ($($t:ty),* $(,)?) => {
        $(
            impl Fingerprint for $t {
                fn memo_key(&self) -> Option<MemoKey> {
                    Some(MemoKey::Signed(*self as i128))
                }
                fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
                    Ok(self.to_le_bytes().to_vec())
                }
            }
        )*
    };
}

macro_rules! impl_fingerprint_unsigned {
    ($($t:ty),* $(,)?) => {
        $(
            impl Fingerprint for $t {
                fn memo_key(&self) -> Option<MemoKey> {
                    Some(MemoKey::Unsigned(*self as u128))
                }
                fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
                    Ok(self.to_le_bytes().to_vec())
                }
            }
        )*
    };
}

impl_fingerprint_signed!(i8, i16, i32, i64, i128, isize);
impl_fingerprint_unsigned!(u8, u16, u32, u64, u128, usize);

impl Fingerprint for bool {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Bool(*self))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(vec![if *self { 0x31 } else { 0x30 }])
    }
}

impl Fingerprint for () {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Unit)
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(vec![0x30])
    }
}

impl Fingerprint for f32 {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::FloatBits(canonical_f64_bits(*self as f64)))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(canonical_f64_bits(*self as f64).to_le_bytes().to_vec())
    }
}

impl Fingerprint for f64 {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::FloatBits(canonical_f64_bits(*self)))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(canonical_f64_bits(*self).to_le_bytes().to_vec())
    }
}

/// Canonicalizes `-0.0` to `0.0` and every NaN bit pattern to one fixed
/// pattern so that spec-equal floats always fingerprint equal.
fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl Fingerprint for str {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Str(self.to_owned()))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Fingerprint for String {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Str(self.clone()))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Fingerprint for [u8] {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Bytes(self.to_vec()))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(self.to_vec())
    }
}

impl Fingerprint for Vec<u8> {
    fn memo_key(&self) -> Option<MemoKey> {
        Some(MemoKey::Bytes(self.clone()))
    }
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        Ok(self.clone())
    }
}

impl<T: Fingerprint> Fingerprint for Option<T> {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        match self {
            None => Ok(vec![0x30]),
            Some(inner) => {
                let digest = fingerprint(inner, ctx)?;
                let mut out = vec![0x31];
                out.extend_from_slice(&digest);
                Ok(out)
            }
        }
    }
}

impl<T: Fingerprint> Fingerprint for Vec<T> {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        let mut out = Vec::with_capacity(self.len() * 16);
        for item in self {
            out.extend_from_slice(&fingerprint(item, ctx)?);
        }
        Ok(out)
    }
}

impl<T: Fingerprint> Fingerprint for [T] {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        let mut out = Vec::with_capacity(self.len() * 16);
        for item in self {
            out.extend_from_slice(&fingerprint(item, ctx)?);
        }
        Ok(out)
    }
}

impl<K: Fingerprint, V: Fingerprint> Fingerprint for std::collections::BTreeMap<K, V> {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        let mut out = Vec::new();
        for (k, v) in self {
            out.extend_from_slice(&fingerprint(k, ctx)?);
            out.extend_from_slice(&fingerprint(v, ctx)?);
        }
        Ok(out)
    }
}

/// Iteration order of a `HashMap` is unspecified; callers who need
/// order-independent fingerprints should use a `BTreeMap` instead.
impl<K: Fingerprint, V: Fingerprint> Fingerprint for std::collections::HashMap<K, V> {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        let mut out = Vec::new();
        for (k, v) in self {
            out.extend_from_slice(&fingerprint(k, ctx)?);
            out.extend_from_slice(&fingerprint(v, ctx)?);
        }
        Ok(out)
    }
}

impl<T: Fingerprint + ?Sized> Fingerprint for &T {
    fn memo_key(&self) -> Option<MemoKey> {
        (**self).memo_key()
    }
    fn identity(&self) -> Option<usize> {
        (**self).identity()
    }
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        (**self).encode(ctx)
    }
}

impl<T: Fingerprint> Fingerprint for std::sync::Arc<T> {
    fn identity(&self) -> Option<usize> {
        Some(std::sync::Arc::as_ptr(self) as *const () as usize)
    }
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        fingerprint(self.as_ref(), ctx).map(|d| d.to_vec())
    }
}

impl<T: Fingerprint> Fingerprint for std::rc::Rc<T> {
    fn identity(&self) -> Option<usize> {
        Some(std::rc::Rc::as_ptr(self) as *const () as usize)
    }
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        fingerprint(self.as_ref(), ctx).map(|d| d.to_vec())
    }
}

/// Fingerprints `T` via its canonical JSON serialization. This is the
/// explicit, opt-in catch-all for types with no purpose-built
/// [`Fingerprint`] impl -- Rust has no implicit reflection fallback.
pub struct Reduce<T>(pub T);

impl<T: serde::Serialize> Fingerprint for Reduce<T> {
    fn encode(&self, _ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        serde_json::to_vec(&self.0).map_err(|_| unhashable::<T>())
    }
}

/// Fingerprints `T` by feeding it through a caller-registered [`TypeEncoders`]
/// entry. Errors with [`UnhashableTypeError`] if no encoder is registered for
/// `T`, or if the encoder itself fails.
pub struct Encoded<'a, T: 'static> {
    pub value: &'a T,
}

impl<'a, T: 'static> Fingerprint for Encoded<'a, T> {
    fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
        let encoders = ctx.encoders.ok_or_else(unhashable::<T>)?;
        let encoded = encoders.encode(self.value).ok_or_else(unhashable::<T>)?;
        let value = encoded.map_err(|_| unhashable::<T>())?;
        serde_json::to_vec(&value).map_err(|_| unhashable::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn digest<T: Fingerprint>(value: &T) -> [u8; 16] {
        let mut ctx = HashContext::new(None);
        fingerprint(value, &mut ctx).unwrap()
    }

    #[test]
    fn equal_values_fingerprint_equal() {
        assert_eq!(digest(&42i32), digest(&42i32));
        assert_eq!(digest(&"hello".to_string()), digest(&"hello".to_string()));
    }

    #[test]
    fn different_values_fingerprint_different() {
        assert_ne!(digest(&42i32), digest(&43i32));
        assert_ne!(digest(&"hello".to_string()), digest(&"world".to_string()));
    }

    #[test]
    fn different_types_same_bytes_fingerprint_different() {
        // i32(1) and i64(1) both encode to little-endian bytes, but must
        // still be distinguished by type name.
        assert_ne!(digest(&1i32), digest(&1i64));
    }

    #[test]
    fn negative_zero_equals_positive_zero() {
        assert_eq!(digest(&-0.0f64), digest(&0.0f64));
    }

    #[test]
    fn all_nans_fingerprint_equal() {
        assert_eq!(digest(&f64::NAN), digest(&(-f64::NAN)));
    }

    #[test]
    fn cycle_through_rc_refcell_terminates() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Node {
            value: i32,
            next: RefCell<Option<Rc<Node>>>,
        }

        impl Fingerprint for Node {
            fn identity(&self) -> Option<usize> {
                Some(self as *const Node as usize)
            }
            fn encode(&self, ctx: &mut HashContext) -> Result<Vec<u8>, UnhashableTypeError> {
                let mut out = fingerprint(&self.value, ctx)?.to_vec();
                if let Some(next) = self.next.borrow().as_ref() {
                    out.extend_from_slice(&fingerprint(next.as_ref(), ctx)?);
                }
                Ok(out)
            }
        }

        let a = Rc::new(Node {
            value: 1,
            next: RefCell::new(None),
        });
        *a.next.borrow_mut() = Some(a.clone());

        let mut ctx = HashContext::new(None);
        // Must terminate rather than overflow the stack.
        fingerprint(a.as_ref(), &mut ctx).unwrap();
    }

    #[test]
    fn repeated_simple_values_are_memoized() {
        let mut ctx = HashContext::new(None);
        let first = fingerprint(&"repeat".to_string(), &mut ctx).unwrap();
        let before = ctx.memo.len();
        let second = fingerprint(&"repeat".to_string(), &mut ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.memo.len(), before);
    }
}

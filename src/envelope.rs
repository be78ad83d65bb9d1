//! The stored-value envelope: raw bytes paired with an optional expiry.

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Bytes plus an optional absolute expiry, as written to and read from a
/// [`crate::storage::Storage`] backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    expires_at: Option<jiff::Timestamp>,
    data: Vec<u8>,
}

impl Envelope {
    /// Construct a new envelope. `expires_in` of zero or negative duration is
    /// rejected; `None` means the envelope never expires.
    pub fn new(data: Vec<u8>, expires_in: Option<std::time::Duration>) -> Result<Self, CacheError> {
        let expires_at = match expires_in {
            None => None,
            Some(d) if d.is_zero() => {
                return Err(CacheError::invalid_config(
                    "'expires_in' must be greater than 0",
                ));
            }
            Some(d) => {
                let signed = jiff::SignedDuration::try_from(d)
                    .map_err(|e| CacheError::invalid_config(e.to_string()))?;
                Some(
                    jiff::Timestamp::now()
                        .checked_add(signed)
                        .map_err(|e| CacheError::invalid_config(e.to_string()))?,
                )
            }
        };
        Ok(Self { expires_at, data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| jiff::Timestamp::now() >= at)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(CacheError::backend)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(CacheError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn never_expires_without_ttl() {
        let env = Envelope::new(b"x".to_vec(), None).unwrap();
        assert!(!env.expired());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = Envelope::new(b"x".to_vec(), Some(std::time::Duration::ZERO)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    #[test]
    fn expires_immediately_with_tiny_ttl() {
        let env = Envelope::new(b"x".to_vec(), Some(std::time::Duration::from_millis(1))).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(env.expired());
    }

    #[test]
    fn round_trips_through_bytes() {
        let env = Envelope::new(b"hello".to_vec(), None).unwrap();
        let bytes = env.to_bytes().unwrap();
        let restored = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(restored.data(), b"hello");
    }
}

//! Zeroising byte-secrets for PIN and PUK material
//!
//! Secrets are overwritten when dropped and are never duplicated
//! implicitly: there is no `Clone`, copies go through [`ByteSecret::copy`].

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A fixed-length secret byte buffer, zeroised on drop
#[derive(Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct ByteSecret(Vec<u8>);

impl ByteSecret {
    /// Create a secret by copying the given bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Create a secret by taking ownership of the vector
    pub fn move_from_vec(vec: Vec<u8>) -> Self {
        Self(vec)
    }

    /// Create a secret from a string; the string's bytes stay in the
    /// caller's copy, so prefer [`ByteSecret::move_from_vec`] where the
    /// source can be consumed.
    pub fn unsafe_from_str(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }

    /// Explicitly duplicate the secret
    pub fn copy(&self) -> Self {
        Self(self.0.clone())
    }

    /// Expose the secret bytes
    ///
    /// Equality over exposed slices is not constant-time.
    pub fn reveal(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ByteSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteSecret({} bytes)", self.0.len())
    }
}

/// Source of PIN material, keyed by the applet instance AID
///
/// Implementations may block (e.g. waiting for user entry) and are invoked
/// from worker threads only.
pub trait PinProvider: Send + Sync {
    /// Return the PIN for the security key identified by `aid`
    fn get_pin(&self, aid: &[u8]) -> ByteSecret;
}

/// A trivial [`PinProvider`] returning a fixed PIN
pub struct StaticPinProvider {
    pin: ByteSecret,
}

impl StaticPinProvider {
    /// Create a provider around the given PIN; takes ownership of it
    pub fn new(pin: ByteSecret) -> Self {
        Self { pin }
    }
}

impl PinProvider for StaticPinProvider {
    fn get_pin(&self, _aid: &[u8]) -> ByteSecret {
        self.pin.copy()
    }
}

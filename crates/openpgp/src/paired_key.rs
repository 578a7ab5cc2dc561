//! The pairing record produced by the setup flow
//!
//! The host persists this bundle to recognise a specific card later and
//! to encrypt to it without the card present. The core never stores it.

use bytes::Bytes;

use crate::public_key::PublicKeyMaterial;

/// Public half of a paired security key
#[derive(Debug, Clone)]
pub struct PairedKey {
    /// Instance AID of the paired card
    pub aid: Bytes,
    /// Fingerprint of the decryption key
    pub encrypt_fingerprint: [u8; 20],
    /// Decryption public key
    pub encrypt_public_key: PublicKeyMaterial,
    /// Fingerprint of the signature key, when one was set up
    pub sign_fingerprint: Option<[u8; 20]>,
    /// Signature public key, when one was set up
    pub sign_public_key: Option<PublicKeyMaterial>,
    /// Fingerprint of the authentication key, when one was set up
    pub auth_fingerprint: Option<[u8; 20]>,
    /// Authentication public key, when one was set up
    pub auth_public_key: Option<PublicKeyMaterial>,
}

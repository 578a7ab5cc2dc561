//! Websafe base64 (RFC 4648 §5, unpadded)
//!
//! The encoding FIDO collaborators use for challenges, key handles and
//! registration data.

use base64::prelude::*;

/// Encode bytes as unpadded URL-safe base64
pub fn encode(data: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded URL-safe base64
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL_SAFE_NO_PAD.decode(encoded)
}

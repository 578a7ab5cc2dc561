//! OpenPGP v4 fingerprints
//!
//! The fingerprint of a card key is the SHA-1 over the canonical v4
//! public-key packet: `99 || len || 04 || creation-time || algorithm ||
//! MPIs`, with MPIs in minimal RFC 4880 form.

use sha1::{Digest, Sha1};

/// Public-key algorithm id for RSA (encrypt or sign)
const ALGORITHM_RSA: u8 = 0x01;

/// Compute the v4 fingerprint of an RSA public key
pub fn rsa_fingerprint(creation_time: u32, modulus: &[u8], exponent: &[u8]) -> [u8; 20] {
    let mut body = Vec::with_capacity(6 + 4 + modulus.len() + exponent.len());
    body.push(0x04);
    body.extend_from_slice(&creation_time.to_be_bytes());
    body.push(ALGORITHM_RSA);
    put_mpi(&mut body, modulus);
    put_mpi(&mut body, exponent);

    let mut hasher = Sha1::new();
    hasher.update([0x99]);
    hasher.update((body.len() as u16).to_be_bytes());
    hasher.update(&body);
    hasher.finalize().into()
}

/// Append an RFC 4880 MPI: a two-byte bit count followed by the value
/// without leading zero octets.
fn put_mpi(out: &mut Vec<u8>, value: &[u8]) {
    let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    let value = &value[start..];
    let bits = match value.first() {
        Some(&first) => (value.len() as u16 - 1) * 8 + (8 - first.leading_zeros() as u16),
        None => 0,
    };
    out.extend_from_slice(&bits.to_be_bytes());
    out.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_mpi_minimal_encoding() {
        let mut out = Vec::new();
        put_mpi(&mut out, &hex!("00000001"));
        assert_eq!(out, hex!("000101"));

        let mut out = Vec::new();
        put_mpi(&mut out, &hex!("01FF"));
        assert_eq!(out, hex!("000901FF"));

        let mut out = Vec::new();
        put_mpi(&mut out, &hex!("80"));
        assert_eq!(out, hex!("000880"));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let n = [0x55u8; 256];
        let e = hex!("010001");
        let a = rsa_fingerprint(0x5E000000, &n, &e);
        let b = rsa_fingerprint(0x5E000000, &n, &e);
        assert_eq!(a, b);
        assert_ne!(a, rsa_fingerprint(0x5E000001, &n, &e));
    }

    /// Precomputed vector: timestamp 0x5E000000, n = the 255 bytes
    /// 0x01..=0xFF, e = 0x010001.
    #[test]
    fn test_fingerprint_vector() {
        let n: Vec<u8> = (1u8..=255).collect();
        let e = hex!("010001");
        let fp = rsa_fingerprint(0x5E000000, &n, &e);
        assert_eq!(fp, hex!("75D98E06F2DA1C84F1F8E5DFA3C72145301C8E93"));
    }
}

//! Host-side RSA key generation for the setup flow
//!
//! The pairing flow generates key pairs on the host and imports them into
//! the card. The card wants the private key as raw big-endian component
//! bytes, CRT parts included, so everything is derived here once and kept
//! as plain byte vectors.

use num_bigint_dig::ModInverse;
use num_traits::One;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

use crate::error::{Error, Result};

/// Raw RSA key components, big-endian, unpadded
#[derive(Debug, Clone)]
pub struct RsaKeyComponents {
    /// Modulus n
    pub modulus: Vec<u8>,
    /// Public exponent e
    pub public_exponent: Vec<u8>,
    /// First prime p
    pub prime_p: Vec<u8>,
    /// Second prime q
    pub prime_q: Vec<u8>,
    /// u = p^-1 mod q
    pub crt_coefficient: Vec<u8>,
    /// dp = d mod (p - 1)
    pub exponent_dp: Vec<u8>,
    /// dq = d mod (q - 1)
    pub exponent_dq: Vec<u8>,
}

impl RsaKeyComponents {
    /// Derive all components from a generated private key
    pub fn from_private_key(key: &RsaPrivateKey) -> Result<Self> {
        let primes = key.primes();
        if primes.len() != 2 {
            return Err(Error::KeyGeneration("multi-prime keys unsupported".into()));
        }
        let p = &primes[0];
        let q = &primes[1];
        let d = key.d();
        let one = BigUint::one();

        // the card's u is p^-1 mod q, unlike PKCS#1's qInv
        let u = p
            .clone()
            .mod_inverse(q)
            .and_then(|inv| inv.to_biguint())
            .ok_or_else(|| Error::KeyGeneration("p has no inverse mod q".into()))?;
        let dp = d % (p - &one);
        let dq = d % (q - &one);

        Ok(Self {
            modulus: key.n().to_bytes_be(),
            public_exponent: key.e().to_bytes_be(),
            prime_p: p.to_bytes_be(),
            prime_q: q.to_bytes_be(),
            crt_coefficient: u.to_bytes_be(),
            exponent_dp: dp.to_bytes_be(),
            exponent_dq: dq.to_bytes_be(),
        })
    }

    /// Modulus length in bits
    pub fn modulus_bits(&self) -> usize {
        self.modulus.len() * 8
    }
}

/// Generate an RSA-2048 key pair and return its raw components
pub fn generate_rsa_2048() -> Result<RsaKeyComponents> {
    let key = RsaPrivateKey::new(&mut rand_v8::thread_rng(), 2048)
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    RsaKeyComponents::from_private_key(&key)
}

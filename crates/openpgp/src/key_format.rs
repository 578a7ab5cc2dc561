//! Key slots and algorithm attributes
//!
//! The card describes each key slot with a small "algorithm attributes"
//! DO (tags C1-C3); [`KeyFormat`] is its decoded form.

use bytes::Bytes;

use crate::constants::tags;
use crate::error::{Error, Result};

/// The three key slots of the OpenPGP card application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Signature key (CRT B6)
    Sign,
    /// Decryption key (CRT B8)
    Encrypt,
    /// Authentication key (CRT A4)
    Auth,
}

impl KeyType {
    /// All slots in fingerprint-DO order
    pub const ALL: [KeyType; 3] = [KeyType::Sign, KeyType::Encrypt, KeyType::Auth];

    /// Control reference template tag naming the slot
    pub const fn crt_tag(self) -> u8 {
        match self {
            Self::Sign => 0xB6,
            Self::Encrypt => 0xB8,
            Self::Auth => 0xA4,
        }
    }

    /// Algorithm attributes DO of the slot
    pub const fn algorithm_attributes_tag(self) -> u16 {
        match self {
            Self::Sign => tags::ALGO_ATTR_SIGN,
            Self::Encrypt => tags::ALGO_ATTR_ENCRYPT,
            Self::Auth => tags::ALGO_ATTR_AUTH,
        }
    }

    /// Fingerprint DO of the slot (PUT DATA)
    pub const fn fingerprint_tag(self) -> u16 {
        match self {
            Self::Sign => tags::FP_SIGN,
            Self::Encrypt => tags::FP_ENCRYPT,
            Self::Auth => tags::FP_AUTH,
        }
    }

    /// Generation timestamp DO of the slot (PUT DATA)
    pub const fn generation_time_tag(self) -> u16 {
        match self {
            Self::Sign => tags::GEN_TIME_SIGN,
            Self::Encrypt => tags::GEN_TIME_ENCRYPT,
            Self::Auth => tags::GEN_TIME_AUTH,
        }
    }

    /// Offset of the slot's fingerprint in the 60-byte fingerprints DO
    pub const fn fingerprint_offset(self) -> usize {
        match self {
            Self::Sign => 0,
            Self::Encrypt => 20,
            Self::Auth => 40,
        }
    }
}

/// RSA private-key import formats (algorithm attributes byte 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaImportFormat {
    /// e, p, q
    Standard,
    /// e, p, q, n
    StandardWithModulus,
    /// e, p, q, u, dp, dq
    Crt,
    /// e, p, q, u, dp, dq, n
    CrtWithModulus,
}

impl RsaImportFormat {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Standard),
            0x01 => Ok(Self::StandardWithModulus),
            0x02 => Ok(Self::Crt),
            0x03 => Ok(Self::CrtWithModulus),
            _ => Err(Error::UnsupportedKeyFormat("unknown RSA import format")),
        }
    }

    /// Whether the CRT components (u, dp, dq) are sent
    pub const fn includes_crt(self) -> bool {
        matches!(self, Self::Crt | Self::CrtWithModulus)
    }

    /// Whether the modulus is sent
    pub const fn includes_modulus(self) -> bool {
        matches!(self, Self::StandardWithModulus | Self::CrtWithModulus)
    }
}

const ALGO_RSA: u8 = 0x01;
const ALGO_ECDH: u8 = 0x12;
const ALGO_ECDSA: u8 = 0x13;
const ALGO_EDDSA: u8 = 0x16;

/// Decoded algorithm attributes of one key slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFormat {
    /// RSA with the given modulus and public-exponent sizes
    Rsa {
        /// Modulus length in bits
        modulus_bits: u16,
        /// Public exponent length in bits
        exponent_bits: u16,
        /// Private-key import format
        import_format: RsaImportFormat,
    },
    /// ECDSA/ECDH on the named curve
    Ec {
        /// Curve OID (without the 0x06 tag)
        curve_oid: Bytes,
        /// Import format includes the public point
        with_pubkey: bool,
    },
    /// EdDSA on the named curve
    Eddsa {
        /// Curve OID (without the 0x06 tag)
        curve_oid: Bytes,
    },
}

impl KeyFormat {
    /// Decode an algorithm attributes DO
    pub fn parse(attrs: &[u8]) -> Result<Self> {
        let (&algo, rest) = attrs
            .split_first()
            .ok_or(Error::UnsupportedKeyFormat("empty algorithm attributes"))?;
        match algo {
            ALGO_RSA => {
                if rest.len() < 5 {
                    return Err(Error::UnsupportedKeyFormat("short RSA attributes"));
                }
                Ok(Self::Rsa {
                    modulus_bits: u16::from_be_bytes([rest[0], rest[1]]),
                    exponent_bits: u16::from_be_bytes([rest[2], rest[3]]),
                    import_format: RsaImportFormat::from_u8(rest[4])?,
                })
            }
            ALGO_ECDH | ALGO_ECDSA => {
                let (oid, with_pubkey) = split_curve_oid(rest)?;
                Ok(Self::Ec {
                    curve_oid: oid,
                    with_pubkey,
                })
            }
            ALGO_EDDSA => {
                let (oid, _) = split_curve_oid(rest)?;
                Ok(Self::Eddsa { curve_oid: oid })
            }
            _ => Err(Error::UnsupportedKeyFormat("unknown algorithm id")),
        }
    }
}

/// The curve OID runs to the end of the attributes; a trailing 0xFF is the
/// import-format flag asking for the public point alongside the scalar.
fn split_curve_oid(rest: &[u8]) -> Result<(Bytes, bool)> {
    if rest.is_empty() {
        return Err(Error::UnsupportedKeyFormat("missing curve OID"));
    }
    match rest.split_last() {
        Some((&0xFF, oid)) if !oid.is_empty() => Ok((Bytes::copy_from_slice(oid), true)),
        _ => Ok((Bytes::copy_from_slice(rest), false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_rsa_attributes() {
        let format = KeyFormat::parse(&hex!("010800001103")).unwrap();
        assert_eq!(
            format,
            KeyFormat::Rsa {
                modulus_bits: 2048,
                exponent_bits: 17,
                import_format: RsaImportFormat::CrtWithModulus,
            }
        );
    }

    #[test]
    fn test_ec_attributes_with_pubkey_flag() {
        // ECDSA P-256, import format "with public key"
        let format = KeyFormat::parse(&hex!("132A8648CE3D030107FF")).unwrap();
        assert_eq!(
            format,
            KeyFormat::Ec {
                curve_oid: Bytes::from_static(&hex!("2A8648CE3D030107")),
                with_pubkey: true,
            }
        );
    }

    #[test]
    fn test_eddsa_attributes() {
        let format = KeyFormat::parse(&hex!("162B06010401DA470F01")).unwrap();
        assert_eq!(
            format,
            KeyFormat::Eddsa {
                curve_oid: Bytes::from_static(&hex!("2B06010401DA470F01")),
            }
        );
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        assert!(KeyFormat::parse(&hex!("7F0102")).is_err());
        assert!(KeyFormat::parse(&[]).is_err());
    }

    #[test]
    fn test_key_type_tags() {
        assert_eq!(KeyType::Sign.crt_tag(), 0xB6);
        assert_eq!(KeyType::Encrypt.crt_tag(), 0xB8);
        assert_eq!(KeyType::Auth.crt_tag(), 0xA4);
        assert_eq!(KeyType::Encrypt.fingerprint_tag(), 0x00C8);
        assert_eq!(KeyType::Auth.generation_time_tag(), 0x00D0);
        assert_eq!(KeyType::Auth.fingerprint_offset(), 40);
    }
}

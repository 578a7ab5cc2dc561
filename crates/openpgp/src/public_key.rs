//! Parsing of public keys returned by GENERATE ASYMMETRIC KEY PAIR
//!
//! The card answers with a 7F49 template: RSA keys carry modulus (81) and
//! exponent (82), EC keys the uncompressed point (86). The curve itself is
//! not in the template; it comes from the slot's algorithm attributes.

use bytes::Bytes;

use keyfob_core::Tlv;

use crate::constants::tags;
use crate::error::{Error, Result};
use crate::key_format::KeyFormat;

/// Public key material read back from the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// RSA public key
    Rsa {
        /// Modulus, big-endian
        modulus: Bytes,
        /// Public exponent, big-endian
        exponent: Bytes,
    },
    /// EC public key
    Ec {
        /// Uncompressed point (04 || x || y), or compressed per curve rules
        point: Bytes,
        /// Curve OID from the slot's algorithm attributes
        curve_oid: Bytes,
    },
}

/// Parse a GENERATE ASYMMETRIC KEY PAIR (read mode) response
pub fn parse_public_key(data: &Bytes, format: &KeyFormat) -> Result<PublicKeyMaterial> {
    let template = Tlv::parse_single(data, false)
        .ok()
        .filter(|tlv| tlv.tag == tags::PUBLIC_KEY)
        .ok_or(Error::CapabilityParse("missing public key template"))?;

    match format {
        KeyFormat::Rsa { .. } => {
            let modulus = template
                .find_recursive(tags::RSA_MODULUS)
                .ok_or(Error::CapabilityParse("missing RSA modulus"))?
                .value
                .clone();
            let exponent = template
                .find_recursive(tags::RSA_EXPONENT)
                .ok_or(Error::CapabilityParse("missing RSA exponent"))?
                .value
                .clone();
            Ok(PublicKeyMaterial::Rsa { modulus, exponent })
        }
        KeyFormat::Ec { curve_oid, .. } | KeyFormat::Eddsa { curve_oid } => {
            let point = template
                .find_recursive(tags::EC_POINT)
                .ok_or(Error::CapabilityParse("missing EC point"))?
                .value
                .clone();
            Ok(PublicKeyMaterial::Ec {
                point,
                curve_oid: curve_oid.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_format::RsaImportFormat;
    use bytes::{BufMut, BytesMut};
    use hex_literal::hex;

    fn rsa_format() -> KeyFormat {
        KeyFormat::Rsa {
            modulus_bits: 2048,
            exponent_bits: 17,
            import_format: RsaImportFormat::Standard,
        }
    }

    #[test]
    fn test_parse_rsa_template() {
        let modulus = vec![0xC3; 256];
        let mut inner = BytesMut::new();
        inner.put_slice(&Tlv::encode(tags::RSA_MODULUS, &modulus));
        inner.put_slice(&Tlv::encode(tags::RSA_EXPONENT, &hex!("010001")));
        let data = Tlv::encode(tags::PUBLIC_KEY, &inner);

        match parse_public_key(&data, &rsa_format()).unwrap() {
            PublicKeyMaterial::Rsa {
                modulus: m,
                exponent: e,
            } => {
                assert_eq!(m.as_ref(), modulus.as_slice());
                assert_eq!(e.as_ref(), hex!("010001"));
            }
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_parse_ec_template() {
        let point = hex!("04AABB");
        let data = Tlv::encode(tags::PUBLIC_KEY, &Tlv::encode(tags::EC_POINT, &point));
        let format = KeyFormat::Ec {
            curve_oid: Bytes::from_static(&hex!("2A8648CE3D030107")),
            with_pubkey: false,
        };

        match parse_public_key(&data, &format).unwrap() {
            PublicKeyMaterial::Ec { point: p, curve_oid } => {
                assert_eq!(p.as_ref(), point);
                assert_eq!(curve_oid.as_ref(), hex!("2A8648CE3D030107"));
            }
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_missing_component_rejected() {
        let data = Tlv::encode(tags::PUBLIC_KEY, &Tlv::encode(tags::RSA_MODULUS, &[0x01]));
        assert!(parse_public_key(&data, &rsa_format()).is_err());
    }

    #[test]
    fn test_wrong_outer_tag_rejected() {
        let data = Tlv::encode(0x7F48, &[]);
        assert!(parse_public_key(&data, &rsa_format()).is_err());
    }
}

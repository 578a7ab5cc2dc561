//! Capability snapshot of a selected OpenPGP applet
//!
//! Built once from the Application Related Data DO (6E) right after
//! SELECT, and rebuilt after every destructive administrative operation.
//! Snapshots are immutable; the connection swaps whole `Arc`s on refresh
//! so concurrent readers never observe a half-updated view.

use bytes::Bytes;

use keyfob_core::Tlv;

use crate::constants::tags;
use crate::error::{Error, Result};
use crate::key_format::{KeyFormat, KeyType};

const FINGERPRINT_LEN: usize = 20;

/// Feature flags from the historical bytes' card-capabilities entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardFeatures {
    /// Command chaining supported
    pub command_chaining: bool,
    /// Extended Lc/Le supported
    pub extended_length: bool,
}

/// Immutable capability snapshot
#[derive(Debug, Clone)]
pub struct OpenPgpCapabilities {
    /// Full 16-byte instance AID
    pub aid: Bytes,
    /// OpenPGP card specification version (major, minor) from the AID
    pub spec_version: (u8, u8),
    /// Extended-length flag of the extended capabilities DO (C0 byte 0)
    pub extended_length_capable: bool,
    /// Largest command APDU the card accepts
    pub max_cmd_apdu_len: usize,
    /// Largest response APDU the card produces
    pub max_rsp_apdu_len: usize,
    /// Largest cardholder certificate the card stores
    pub max_cardholder_cert_len: usize,
    /// Feature bits from the historical bytes
    pub features: CardFeatures,
    /// Remaining retries for PW1, the resetting code, and PW3
    pub pin_retries: [u8; 3],
    algorithm_attrs: [Option<KeyFormat>; 3],
    fingerprints: [[u8; FINGERPRINT_LEN]; 3],
}

impl OpenPgpCapabilities {
    /// Parse the Application Related Data blob returned by GET DATA 6E
    pub fn parse(application_related_data: &Bytes) -> Result<Self> {
        let nodes = Tlv::parse_all(application_related_data)
            .map_err(|_| Error::CapabilityParse("malformed application related data"))?;

        let find = |tag: u16| Tlv::find_in(&nodes, tag);

        let aid = find(tags::AID)
            .ok_or(Error::CapabilityParse("missing AID"))?
            .value
            .clone();
        if aid.len() < 16 {
            return Err(Error::CapabilityParse("AID too short"));
        }
        let spec_version = (aid[6], aid[7]);

        let features = find(tags::HISTORICAL_BYTES)
            .map(|tlv| parse_historical_features(&tlv.value))
            .unwrap_or_default();

        let c0 = find(tags::EXTENDED_CAPABILITIES).map(|tlv| tlv.value.clone());
        let extended_length_capable = c0
            .as_ref()
            .and_then(|v| v.first())
            .map(|flags| flags & 0x01 != 0)
            .unwrap_or(false);

        let max_cardholder_cert_len = c0
            .as_ref()
            .filter(|v| v.len() >= 6)
            .map(|v| u16::from_be_bytes([v[4], v[5]]) as usize)
            .unwrap_or(0);

        // v3 cards carry the APDU limits in a dedicated DO; v2 cards put
        // them at the end of the extended capabilities
        let (max_cmd_apdu_len, max_rsp_apdu_len) = if let Some(info) =
            find(tags::EXTENDED_LENGTH_INFO)
        {
            parse_extended_length_info(info)?
        } else if spec_version.0 < 3 {
            match c0.as_ref() {
                Some(v) if v.len() >= 10 => (
                    u16::from_be_bytes([v[6], v[7]]) as usize,
                    u16::from_be_bytes([v[8], v[9]]) as usize,
                ),
                _ => (255, 256),
            }
        } else {
            (255, 256)
        };

        let mut algorithm_attrs: [Option<KeyFormat>; 3] = [None, None, None];
        for (i, key_type) in KeyType::ALL.iter().enumerate() {
            if let Some(tlv) = find(key_type.algorithm_attributes_tag()) {
                algorithm_attrs[i] = Some(KeyFormat::parse(&tlv.value)?);
            }
        }

        let mut fingerprints = [[0u8; FINGERPRINT_LEN]; 3];
        if let Some(tlv) = find(tags::FINGERPRINTS) {
            if tlv.value.len() < 3 * FINGERPRINT_LEN {
                return Err(Error::CapabilityParse("fingerprint DO too short"));
            }
            for (i, key_type) in KeyType::ALL.iter().enumerate() {
                let offset = key_type.fingerprint_offset();
                fingerprints[i].copy_from_slice(&tlv.value[offset..offset + FINGERPRINT_LEN]);
            }
        }

        let pin_retries = match find(tags::PW_STATUS) {
            Some(tlv) if tlv.value.len() >= 7 => [tlv.value[4], tlv.value[5], tlv.value[6]],
            _ => [0, 0, 0],
        };

        Ok(Self {
            aid,
            spec_version,
            extended_length_capable,
            max_cmd_apdu_len: max_cmd_apdu_len.max(255),
            max_rsp_apdu_len: max_rsp_apdu_len.max(256),
            max_cardholder_cert_len,
            features,
            pin_retries,
            algorithm_attrs,
            fingerprints,
        })
    }

    /// Algorithm attributes of a slot, if the card reported them
    pub fn key_format(&self, key_type: KeyType) -> Option<&KeyFormat> {
        self.algorithm_attrs[index_of(key_type)].as_ref()
    }

    /// The slot's fingerprint, or `None` while no key is present
    pub fn fingerprint(&self, key_type: KeyType) -> Option<&[u8; FINGERPRINT_LEN]> {
        let fp = &self.fingerprints[index_of(key_type)];
        if fp.iter().any(|&b| b != 0) {
            Some(fp)
        } else {
            None
        }
    }

    /// Whether the slot holds a key
    pub fn has_key(&self, key_type: KeyType) -> bool {
        self.fingerprint(key_type).is_some()
    }

    /// Whether the decryption slot holds a key; an all-zero encryption
    /// fingerprint marks a card that was never set up
    pub fn has_encrypt_key(&self) -> bool {
        self.has_key(KeyType::Encrypt)
    }

    /// Card serial number from the AID
    pub fn serial_number(&self) -> u32 {
        u32::from_be_bytes([self.aid[10], self.aid[11], self.aid[12], self.aid[13]])
    }
}

const fn index_of(key_type: KeyType) -> usize {
    match key_type {
        KeyType::Sign => 0,
        KeyType::Encrypt => 1,
        KeyType::Auth => 2,
    }
}

/// The extended length information DO carries two tag-02 values: maximum
/// command and maximum response APDU length.
fn parse_extended_length_info(info: &Tlv) -> Result<(usize, usize)> {
    let mut values = info.children.iter().filter(|t| t.tag == 0x02);
    match (values.next(), values.next()) {
        (Some(cmd), Some(rsp)) if cmd.value.len() >= 2 && rsp.value.len() >= 2 => Ok((
            u16::from_be_bytes([cmd.value[0], cmd.value[1]]) as usize,
            u16::from_be_bytes([rsp.value[0], rsp.value[1]]) as usize,
        )),
        _ => Err(Error::CapabilityParse("malformed extended length info")),
    }
}

/// Compact-TLV walk of the historical bytes looking for the card
/// capabilities entry (tag 7, length 3)
fn parse_historical_features(historical: &[u8]) -> CardFeatures {
    let mut features = CardFeatures::default();
    if historical.is_empty() {
        return features;
    }
    // first byte is the category indicator; only format 0x00 carries
    // compact-TLV data objects
    if historical[0] != 0x00 {
        return features;
    }
    let mut idx = 1;
    // the trailing three bytes are the mandatory status indicator
    let end = historical.len().saturating_sub(3);
    while idx < end {
        let tag = historical[idx] >> 4;
        let len = (historical[idx] & 0x0F) as usize;
        idx += 1;
        if tag == 0x7 && len == 3 && idx + 2 < historical.len() {
            let third = historical[idx + 2];
            features.command_chaining = third & 0x80 != 0;
            features.extended_length = third & 0x40 != 0;
            return features;
        }
        idx += len;
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn encode_do(tag: u16, value: &[u8]) -> Bytes {
        Tlv::encode(tag, value)
    }

    /// Minimal but structurally correct Application Related Data
    pub(crate) fn sample_ard(fingerprints: &[u8; 60], attrs: &[u8]) -> Bytes {
        let aid = hex_aid();
        let mut discretionary = BytesMut::new();
        // extended caps: flags, SM, challenge, cert len, cmd len, rsp len
        discretionary.put_slice(&encode_do(
            tags::EXTENDED_CAPABILITIES,
            &[0x75, 0x00, 0x00, 0x20, 0x08, 0x00, 0x08, 0x00, 0x08, 0x00],
        ));
        discretionary.put_slice(&encode_do(tags::ALGO_ATTR_SIGN, attrs));
        discretionary.put_slice(&encode_do(tags::ALGO_ATTR_ENCRYPT, attrs));
        discretionary.put_slice(&encode_do(tags::ALGO_ATTR_AUTH, attrs));
        discretionary.put_slice(&encode_do(
            tags::PW_STATUS,
            &[0x00, 0x20, 0x20, 0x20, 0x03, 0x00, 0x03],
        ));
        discretionary.put_slice(&encode_do(tags::FINGERPRINTS, fingerprints));

        let mut ard = BytesMut::new();
        ard.put_slice(&encode_do(tags::AID, &aid));
        ard.put_slice(&encode_do(
            tags::HISTORICAL_BYTES,
            &[0x00, 0x31, 0xC5, 0x73, 0xC0, 0x01, 0x40, 0x05, 0x90, 0x00],
        ));
        ard.put_slice(&encode_do(tags::DISCRETIONARY, &discretionary));
        encode_do(tags::APPLICATION_RELATED_DATA, &ard)
    }

    fn hex_aid() -> [u8; 16] {
        [
            0xD2, 0x76, 0x00, 0x01, 0x24, 0x01, 0x02, 0x01, 0x00, 0x06, 0x01, 0x23, 0x45, 0x67,
            0x00, 0x00,
        ]
    }

    #[test]
    fn test_parse_sample() {
        let attrs = [0x01, 0x08, 0x00, 0x00, 0x11, 0x03];
        let ard = sample_ard(&[0u8; 60], &attrs);
        let caps = OpenPgpCapabilities::parse(&ard).unwrap();

        assert_eq!(caps.spec_version, (0x02, 0x01));
        assert_eq!(caps.serial_number(), 0x01234567);
        assert!(caps.extended_length_capable);
        assert_eq!(caps.max_cmd_apdu_len, 0x0800);
        assert_eq!(caps.max_rsp_apdu_len, 0x0800);
        assert_eq!(caps.max_cardholder_cert_len, 0x0800);
        assert_eq!(caps.pin_retries, [3, 0, 3]);
        assert!(!caps.has_encrypt_key());
        assert!(matches!(
            caps.key_format(KeyType::Encrypt),
            Some(KeyFormat::Rsa {
                modulus_bits: 2048,
                exponent_bits: 17,
                ..
            })
        ));
    }

    #[test]
    fn test_fingerprint_presence() {
        let attrs = [0x01, 0x08, 0x00, 0x00, 0x11, 0x00];
        let mut fingerprints = [0u8; 60];
        fingerprints[20..40].copy_from_slice(&[0xAB; 20]);
        let ard = sample_ard(&fingerprints, &attrs);
        let caps = OpenPgpCapabilities::parse(&ard).unwrap();

        assert!(!caps.has_key(KeyType::Sign));
        assert!(caps.has_encrypt_key());
        assert!(!caps.has_key(KeyType::Auth));
        assert_eq!(caps.fingerprint(KeyType::Encrypt), Some(&[0xAB; 20]));
    }

    #[test]
    fn test_historical_features() {
        let features =
            parse_historical_features(&[0x00, 0x31, 0xC5, 0x73, 0xC0, 0x01, 0xC0, 0x05, 0x90, 0x00]);
        assert!(features.command_chaining);
        assert!(features.extended_length);

        let features = parse_historical_features(&[0x10, 0x73, 0xC0, 0x01, 0xC0]);
        assert!(!features.command_chaining);
    }

    #[test]
    fn test_missing_aid_rejected() {
        let blob = encode_do(tags::APPLICATION_RELATED_DATA, &[]);
        assert!(matches!(
            OpenPgpCapabilities::parse(&blob),
            Err(Error::CapabilityParse(_))
        ));
    }
}

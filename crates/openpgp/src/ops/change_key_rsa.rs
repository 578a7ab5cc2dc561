//! RSA private-key import
//!
//! Builds the extended header list of OpenPGP card spec §4.4.3.12 and
//! writes it with PUT DATA (odd). Component sizes come from the slot's
//! algorithm attributes; values are left-padded to those sizes. After the
//! import the fingerprint and generation-time DOs are written so the card
//! reports the key exactly as a locally-generated one would be.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use keyfob_core::{CardTransport, Tlv};

use crate::connection::OpenPgpConnection;
use crate::constants::tags;
use crate::error::{Error, Result};
use crate::fingerprint::rsa_fingerprint;
use crate::key_format::{KeyFormat, KeyType, RsaImportFormat};
use crate::rsa_util::RsaKeyComponents;

/// RSA key import operation
#[derive(Debug)]
pub struct ChangeKeyRsaOp<'a, T: CardTransport> {
    connection: &'a mut OpenPgpConnection<T>,
}

impl<'a, T: CardTransport> ChangeKeyRsaOp<'a, T> {
    /// Borrow the connection for an import
    pub fn new(connection: &'a mut OpenPgpConnection<T>) -> Self {
        Self { connection }
    }

    /// Import `key` into `key_type`'s slot and stamp it with
    /// `creation_time`; returns the fingerprint now on the card.
    ///
    /// Requires prior PW3 verification.
    pub fn change_key(
        &mut self,
        key_type: KeyType,
        key: &RsaKeyComponents,
        creation_time: u32,
    ) -> Result<[u8; 20]> {
        let capabilities = self.connection.capabilities();
        let format = capabilities
            .key_format(key_type)
            .ok_or(Error::UnsupportedKeyFormat("slot has no algorithm attributes"))?;
        let &KeyFormat::Rsa {
            modulus_bits,
            exponent_bits,
            import_format,
        } = format
        else {
            return Err(Error::UnsupportedKeyFormat("slot is not configured for RSA"));
        };
        if key.modulus_bits() != modulus_bits as usize {
            return Err(Error::UnsupportedKeyFormat("modulus size does not match slot"));
        }

        let header_list = build_extended_header_list(
            key_type,
            key,
            modulus_bits,
            exponent_bits,
            import_format,
        )?;
        self.connection
            .put_data_odd(&header_list)
            .map_err(|err| match err {
                Error::ApduStatus { sw } => Error::KeyImportRejected { sw },
                Error::WrongData => Error::KeyImportRejected { sw: 0x6A80 },
                other => other,
            })?;

        let fingerprint = rsa_fingerprint(creation_time, &key.modulus, &key.public_exponent);
        self.connection
            .put_data(key_type.fingerprint_tag(), &fingerprint)?;
        self.connection
            .put_data(key_type.generation_time_tag(), &creation_time.to_be_bytes())?;

        debug!(
            ?key_type,
            fingerprint = %hex::encode(fingerprint),
            "RSA key imported"
        );
        Ok(fingerprint)
    }
}

/// `4D L { crt 00, 7F48 template, 5F48 concatenated values }`
fn build_extended_header_list(
    key_type: KeyType,
    key: &RsaKeyComponents,
    modulus_bits: u16,
    exponent_bits: u16,
    import_format: RsaImportFormat,
) -> Result<Bytes> {
    let n_len = modulus_bits as usize / 8;
    let half_len = modulus_bits as usize / 16;
    let e_len = exponent_bits.div_ceil(8) as usize;

    // component order is fixed: e, p, q, then CRT parts, then n
    let mut components: Vec<(u8, Vec<u8>)> = vec![
        (0x91, left_pad(&key.public_exponent, e_len)?),
        (0x92, left_pad(&key.prime_p, half_len)?),
        (0x93, left_pad(&key.prime_q, half_len)?),
    ];
    if import_format.includes_crt() {
        components.push((0x94, left_pad(&key.crt_coefficient, half_len)?));
        components.push((0x95, left_pad(&key.exponent_dp, half_len)?));
        components.push((0x96, left_pad(&key.exponent_dq, half_len)?));
    }
    if import_format.includes_modulus() {
        components.push((0x97, left_pad(&key.modulus, n_len)?));
    }

    // the template lists each component's tag and length; the values
    // follow back-to-back in the same order
    let mut template = BytesMut::new();
    let mut cryptogram = BytesMut::new();
    for (tag, value) in &components {
        template.put_u8(*tag);
        template.put_slice(&encode_length(value.len()));
        cryptogram.put_slice(value);
    }

    let mut inner = BytesMut::new();
    inner.put_u8(key_type.crt_tag());
    inner.put_u8(0x00);
    inner.put_slice(&Tlv::encode(tags::PRIVATE_KEY_TEMPLATE, &template));
    inner.put_slice(&Tlv::encode(tags::PRIVATE_KEY_DATA, &cryptogram));

    Ok(Tlv::encode(tags::EXTENDED_HEADER_LIST, &inner))
}

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xFF {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

fn left_pad(value: &[u8], len: usize) -> Result<Vec<u8>> {
    let value = {
        let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
        &value[start..]
    };
    if value.len() > len {
        return Err(Error::UnsupportedKeyFormat("component larger than slot size"));
    }
    let mut padded = vec![0u8; len - value.len()];
    padded.extend_from_slice(value);
    Ok(padded)
}

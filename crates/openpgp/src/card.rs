//! High-level view of one OpenPGP security key
//!
//! Wraps the applet connection with the operations an application
//! actually wants: emptiness check, public-key retrieval, certificate
//! storage, factory reset and the pairing flow.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, warn};

use keyfob_core::{ByteSecret, CardTransport};

use crate::capabilities::OpenPgpCapabilities;
use crate::connection::OpenPgpConnection;
use crate::constants::{DEFAULT_PW3, tags};
use crate::error::{Error, Result};
use crate::key_format::KeyType;
use crate::ops::{ChangeKeyRsaOp, ModifyPinOp, ResetAndWipeOp};
use crate::paired_key::PairedKey;
use crate::public_key::{PublicKeyMaterial, parse_public_key};
use crate::rsa_util::{RsaKeyComponents, generate_rsa_2048};

/// One OpenPGP security key over one live transport
#[derive(Debug)]
pub struct OpenPgpCard<T: CardTransport> {
    connection: OpenPgpConnection<T>,
}

impl<T: CardTransport> OpenPgpCard<T> {
    /// SELECT the applet and probe the card
    pub fn open(transport: T) -> Result<Self> {
        Ok(Self {
            connection: OpenPgpConnection::open(transport)?,
        })
    }

    /// The underlying applet connection
    pub fn connection(&mut self) -> &mut OpenPgpConnection<T> {
        &mut self.connection
    }

    /// Current capability snapshot
    pub fn capabilities(&self) -> std::sync::Arc<OpenPgpCapabilities> {
        self.connection.capabilities()
    }

    /// Instance AID of the applet
    pub fn aid(&self) -> Bytes {
        self.connection.capabilities().aid.clone()
    }

    /// True when the card has never been set up (no decryption key)
    pub fn is_empty(&self) -> bool {
        !self.connection.capabilities().has_encrypt_key()
    }

    /// Read a slot's public key
    pub fn retrieve_public_key(&mut self, key_type: KeyType) -> Result<PublicKeyMaterial> {
        let capabilities = self.connection.capabilities();
        let format = capabilities
            .key_format(key_type)
            .ok_or(Error::UnsupportedKeyFormat("slot has no algorithm attributes"))?
            .clone();
        let data = self.connection.read_public_key(key_type)?;
        parse_public_key(&data, &format)
    }

    /// Read the cardholder certificate DO (7F21)
    pub fn read_certificate(&mut self) -> Result<Bytes> {
        self.connection.get_data(tags::CARDHOLDER_CERTIFICATE)
    }

    /// Write the cardholder certificate DO (7F21)
    ///
    /// Requires prior PW3 verification.
    pub fn put_certificate(&mut self, data: &[u8]) -> Result<()> {
        let max = self.connection.capabilities().max_cardholder_cert_len;
        if max > 0 && data.len() > max {
            return Err(Error::WrongData);
        }
        self.connection.put_data(tags::CARDHOLDER_CERTIFICATE, data)
    }

    /// Whether this card is the one a pairing record was made from
    pub fn matches_paired_key(&self, paired: &PairedKey) -> bool {
        self.connection
            .capabilities()
            .fingerprint(KeyType::Encrypt)
            .is_some_and(|fp| *fp == paired.encrypt_fingerprint)
    }

    /// Factory-reset the card and authenticate with the default PW3
    pub fn wipe_and_verify(&mut self) -> Result<()> {
        ResetAndWipeOp::new(&mut self.connection).reset_and_wipe()?;
        self.connection
            .verify_admin_pin(&ByteSecret::from_bytes(DEFAULT_PW3))
    }

    /// Set up the card for pairing: wipe, generate and import RSA-2048
    /// keys, replace the default PINs, and return the pairing record.
    ///
    /// This is destructive. Existing keys are erased without further
    /// confirmation. On failure the card's state is undefined (an import
    /// may have succeeded before a later step failed); callers should
    /// wipe and retry.
    pub fn setup_paired(
        &mut self,
        new_pin: &ByteSecret,
        new_admin_pin: &ByteSecret,
        encryption_only: bool,
    ) -> Result<PairedKey> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.setup_paired_at(new_pin, new_admin_pin, encryption_only, timestamp)
    }

    /// [`OpenPgpCard::setup_paired`] with an explicit key creation time
    pub fn setup_paired_at(
        &mut self,
        new_pin: &ByteSecret,
        new_admin_pin: &ByteSecret,
        encryption_only: bool,
        timestamp: u32,
    ) -> Result<PairedKey> {
        self.setup_paired_inner(new_pin, new_admin_pin, encryption_only, timestamp)
            .map_err(|cause| {
                warn!(error = %cause, "pairing setup failed");
                Error::PairingAborted {
                    cause: Box::new(cause),
                }
            })
    }

    fn setup_paired_inner(
        &mut self,
        new_pin: &ByteSecret,
        new_admin_pin: &ByteSecret,
        encryption_only: bool,
        timestamp: u32,
    ) -> Result<PairedKey> {
        let default_pw3 = ByteSecret::from_bytes(DEFAULT_PW3);

        if self.is_empty() {
            // one attempt with the factory PW3; a wrong counter state
            // falls back to a wipe
            if self.connection.verify_admin_pin(&default_pw3).is_err() {
                self.wipe_and_verify()?;
            }
        } else {
            self.wipe_and_verify()?;
        }

        debug!(encryption_only, "generating RSA-2048 key material");
        let encrypt_key = generate_rsa_2048()?;
        let encrypt_fingerprint =
            self.import_key(KeyType::Encrypt, &encrypt_key, timestamp)?;

        let (sign, auth) = if encryption_only {
            (None, None)
        } else {
            let sign_key = generate_rsa_2048()?;
            let auth_key = generate_rsa_2048()?;
            let sign_fp = self.import_key(KeyType::Sign, &sign_key, timestamp)?;
            let auth_fp = self.import_key(KeyType::Auth, &auth_key, timestamp)?;
            (Some((sign_fp, sign_key)), Some((auth_fp, auth_key)))
        };

        ModifyPinOp::new(&mut self.connection).modify_pw1_and_pw3(
            &default_pw3,
            new_pin,
            new_admin_pin,
        )?;

        let capabilities = self.connection.refresh_capabilities()?;
        let paired = PairedKey {
            aid: capabilities.aid.clone(),
            encrypt_fingerprint,
            encrypt_public_key: public_material(&encrypt_key),
            sign_fingerprint: sign.as_ref().map(|(fp, _)| *fp),
            sign_public_key: sign.as_ref().map(|(_, key)| public_material(key)),
            auth_fingerprint: auth.as_ref().map(|(fp, _)| *fp),
            auth_public_key: auth.as_ref().map(|(_, key)| public_material(key)),
        };
        debug!(
            aid = %hex::encode(&paired.aid),
            fingerprint = %hex::encode(paired.encrypt_fingerprint),
            "pairing setup complete"
        );
        Ok(paired)
    }

    fn import_key(
        &mut self,
        key_type: KeyType,
        key: &RsaKeyComponents,
        timestamp: u32,
    ) -> Result<[u8; 20]> {
        ChangeKeyRsaOp::new(&mut self.connection).change_key(key_type, key, timestamp)
    }

    /// Release the transport; the card object is unusable afterwards
    pub fn release(&mut self) {
        self.connection.release();
    }
}

fn public_material(key: &RsaKeyComponents) -> PublicKeyMaterial {
    PublicKeyMaterial::Rsa {
        modulus: Bytes::copy_from_slice(&key.modulus),
        exponent: Bytes::copy_from_slice(&key.public_exponent),
    }
}

//! Applet connection: SELECT, capability discovery, chaining and PINs
//!
//! One [`OpenPgpConnection`] owns one transport. It splits oversized
//! command APDUs with CLA chaining, reassembles 61xx response chains via
//! GET RESPONSE, retries 6Cxx with the corrected Le, and re-verifies a
//! cached PIN once when the card drops verification state (6982).

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use keyfob_core::{ByteSecret, CardTransport, Command, Response, Tlv};

use crate::capabilities::OpenPgpCapabilities;
use crate::constants::{AID_OPENPGP, ins, pw, tags};
use crate::error::{Error, Result};
use crate::key_format::KeyType;

/// Password references for VERIFY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinSlot {
    /// PW1, valid for a single signature (mode 81)
    Pw1Sign,
    /// PW1, valid until reset (mode 82)
    Pw1,
    /// PW3, the admin PIN (mode 83)
    Pw3,
}

impl PinSlot {
    const fn reference(self) -> u8 {
        match self {
            Self::Pw1Sign => pw::PW1_SIGN,
            Self::Pw1 => pw::PW1,
            Self::Pw3 => pw::PW3,
        }
    }
}

/// A live connection to the OpenPGP applet on one security key
#[derive(Debug)]
pub struct OpenPgpConnection<T: CardTransport> {
    transport: T,
    capabilities: Arc<OpenPgpCapabilities>,
    cached_pin: Option<ByteSecret>,
    cached_admin_pin: Option<ByteSecret>,
}

impl<T: CardTransport> OpenPgpConnection<T> {
    /// SELECT the applet and probe its capabilities
    pub fn open(mut transport: T) -> Result<Self> {
        let select = Command::new(0x00, ins::SELECT, 0x04, 0x00)
            .with_data(AID_OPENPGP.to_vec())
            .with_ne(256);
        let response = transport.transceive(&select)?;
        if !response.is_success() {
            return Err(Error::from_status(response.status()));
        }

        let mut connection = Self {
            transport,
            capabilities: Arc::new(placeholder_capabilities()?),
            cached_pin: None,
            cached_admin_pin: None,
        };
        connection.refresh_capabilities()?;
        debug!(
            aid = %hex::encode(&connection.capabilities.aid),
            version = ?connection.capabilities.spec_version,
            "OpenPGP applet selected"
        );
        Ok(connection)
    }

    /// The current capability snapshot
    ///
    /// Snapshots are immutable; holding one across a destructive admin
    /// operation yields stale data.
    pub fn capabilities(&self) -> Arc<OpenPgpCapabilities> {
        Arc::clone(&self.capabilities)
    }

    /// Re-read the Application Related Data and swap the snapshot
    pub fn refresh_capabilities(&mut self) -> Result<Arc<OpenPgpCapabilities>> {
        let data = self.get_data(tags::APPLICATION_RELATED_DATA)?;
        let caps = OpenPgpCapabilities::parse(&data)?;
        self.capabilities = Arc::new(caps);
        Ok(Arc::clone(&self.capabilities))
    }

    /// Whether extended-length APDUs may be used on this connection
    pub fn extended_length_usable(&self) -> bool {
        self.transport.is_extended_length_supported() && self.capabilities.extended_length_capable
    }

    fn max_command_data_len(&self) -> usize {
        if self.extended_length_usable() {
            self.capabilities.max_cmd_apdu_len
        } else {
            255
        }
    }

    fn response_ne(&self) -> u32 {
        if self.extended_length_usable() {
            keyfob_core::command::NE_MAX
        } else {
            256
        }
    }

    /// Exchange a command, applying both chaining directions and one
    /// cached-PIN retry on 6982.
    pub fn communicate(&mut self, command: &Command) -> Result<Response> {
        match self.transmit_chained(command) {
            Err(Error::SecurityNotSatisfied) if self.cached_pin.is_some() => {
                debug!("verification state lost, re-verifying cached PIN");
                let pin = self.cached_pin.as_ref().map(|p| p.copy());
                if let Some(pin) = pin {
                    self.verify_pin_uncached(PinSlot::Pw1, &pin)?;
                }
                self.transmit_chained(command)
            }
            other => other,
        }
    }

    /// Split oversized commands into CLA-chained chunks, then run the
    /// response-chaining loop on the final chunk.
    fn transmit_chained(&mut self, command: &Command) -> Result<Response> {
        let max = self.max_command_data_len();
        if command.data.len() <= max {
            return self.transmit_reassembling(command.clone());
        }

        let chunks: Vec<&[u8]> = command.data.chunks(max).collect();
        let last = chunks.len() - 1;
        trace!(chunks = chunks.len(), "command chaining");
        for chunk in &chunks[..last] {
            let partial = Command::new(command.cla, command.ins, command.p1, command.p2)
                .with_data(Bytes::copy_from_slice(chunk))
                .with_chaining();
            let response = self.transport.transceive(&partial)?;
            if !response.is_success() {
                return Err(Error::from_status(response.status()));
            }
        }

        let final_chunk = Command::new(command.cla, command.ins, command.p1, command.p2)
            .with_data(Bytes::copy_from_slice(chunks[last]))
            .with_ne(command.ne);
        self.transmit_reassembling(final_chunk)
    }

    /// 61xx / 6Cxx response handling; returns the assembled success
    /// response or the mapped error.
    fn transmit_reassembling(&mut self, mut command: Command) -> Result<Response> {
        let mut assembled = BytesMut::new();
        loop {
            let response = self.transport.transceive(&command)?;
            let status = response.status();

            if status.is_success() {
                assembled.put_slice(response.payload());
                return Ok(Response::success(assembled.freeze()));
            }
            if let Some(remaining) = status.more_data_available() {
                assembled.put_slice(response.payload());
                let ne = if remaining == 0 { 256 } else { remaining as u32 };
                command = Command::new(0x00, ins::GET_RESPONSE, 0x00, 0x00).with_ne(ne);
                continue;
            }
            if let Some(corrected) = status.corrected_le() {
                let ne = if corrected == 0 { 256 } else { corrected as u32 };
                command = command.with_ne(ne);
                continue;
            }
            return Err(Error::from_status(status));
        }
    }

    /// VERIFY a PIN; successful PW1/PW3 verifications are cached for
    /// automatic re-verification.
    pub fn verify_pin(&mut self, slot: PinSlot, pin: &ByteSecret) -> Result<()> {
        self.verify_pin_uncached(slot, pin)?;
        match slot {
            PinSlot::Pw1 => self.cached_pin = Some(pin.copy()),
            PinSlot::Pw3 => self.cached_admin_pin = Some(pin.copy()),
            PinSlot::Pw1Sign => {}
        }
        Ok(())
    }

    fn verify_pin_uncached(&mut self, slot: PinSlot, pin: &ByteSecret) -> Result<()> {
        let command = Command::new(0x00, ins::VERIFY, 0x00, slot.reference())
            .with_data(Bytes::copy_from_slice(pin.reveal()));
        let response = self.transport.transceive(&command)?;
        if response.is_success() {
            return Ok(());
        }
        let err = Error::from_status(response.status());
        if matches!(err, Error::PinIncorrect { .. } | Error::PinBlocked) {
            warn!(?slot, "PIN verification failed");
        }
        Err(err)
    }

    /// VERIFY PW3 with the admin PIN
    pub fn verify_admin_pin(&mut self, pin: &ByteSecret) -> Result<()> {
        self.verify_pin(PinSlot::Pw3, pin)
    }

    /// Read a data object
    pub fn get_data(&mut self, tag: u16) -> Result<Bytes> {
        let command = Command::new(0x00, ins::GET_DATA, (tag >> 8) as u8, tag as u8)
            .with_ne(self.response_ne());
        Ok(self.communicate(&command)?.into_payload())
    }

    /// Write a data object
    pub fn put_data(&mut self, tag: u16, data: &[u8]) -> Result<()> {
        let command = Command::new(0x00, ins::PUT_DATA, (tag >> 8) as u8, tag as u8)
            .with_data(Bytes::copy_from_slice(data));
        self.communicate(&command)?;
        Ok(())
    }

    /// Write an extended header list via PUT DATA (odd instruction)
    pub fn put_data_odd(&mut self, data: &[u8]) -> Result<()> {
        let command = Command::new(0x00, ins::PUT_DATA_ODD, 0x3F, 0xFF)
            .with_data(Bytes::copy_from_slice(data));
        self.communicate(&command)?;
        Ok(())
    }

    /// Read the public key of a slot (GENERATE ASYMMETRIC KEY PAIR, read
    /// mode); returns the raw 7F49 template.
    pub fn read_public_key(&mut self, key_type: KeyType) -> Result<Bytes> {
        let command = Command::new(0x00, ins::GENERATE_ASYMMETRIC_KEY_PAIR, 0x81, 0x00)
            .with_data(vec![key_type.crt_tag(), 0x00])
            .with_ne(self.response_ne());
        Ok(self.communicate(&command)?.into_payload())
    }

    /// TERMINATE DF; requires a blocked or verified admin state
    pub fn terminate_df(&mut self) -> Result<()> {
        let command = Command::new(0x00, ins::TERMINATE_DF, 0x00, 0x00);
        self.communicate(&command)?;
        Ok(())
    }

    /// ACTIVATE FILE, re-initialising a terminated applet
    pub fn activate_file(&mut self) -> Result<()> {
        let command = Command::new(0x00, ins::ACTIVATE_FILE, 0x00, 0x00);
        self.communicate(&command)?;
        Ok(())
    }

    /// Drop any cached PIN material
    pub fn clear_pin_cache(&mut self) {
        self.cached_pin = None;
        self.cached_admin_pin = None;
    }

    /// Release the underlying transport and clear the PIN cache
    pub fn release(&mut self) {
        self.clear_pin_cache();
        self.transport.release();
    }

    /// Access the transport (tests, liveness probes)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Selecting succeeded but capabilities are not read yet; this stand-in
/// is replaced before `open` returns.
fn placeholder_capabilities() -> Result<OpenPgpCapabilities> {
    let minimal = Tlv::encode(
        tags::APPLICATION_RELATED_DATA,
        &Tlv::encode(tags::AID, &[0u8; 16]),
    );
    OpenPgpCapabilities::parse(&minimal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfob_core::MockTransport;

    #[test]
    fn test_select_failure_maps_to_applet_not_present() {
        let transport = MockTransport::new(vec![Bytes::from_static(&[0x6A, 0x82])]);
        match OpenPgpConnection::open(transport) {
            Err(Error::AppletNotPresent) => {}
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}

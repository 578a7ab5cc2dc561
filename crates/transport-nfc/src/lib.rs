//! ISO-DEP (NFC) transport
//!
//! The platform's NFC stack hands over a connected ISO-DEP tag as an
//! [`IsoDepTag`]; this crate frames APDUs over it and stamps activity
//! times for the liveness monitor in `keyfob-manager`.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error as ThisError;
use tracing::debug;

use keyfob_core::{CardTransport, Clock, Command, Error, Response, Result, TransportKind};

/// Errors surfaced by the platform NFC stack
#[derive(Debug, ThisError)]
pub enum NfcTagError {
    /// The tag left the field
    #[error("NFC tag lost")]
    TagLost,
    /// Any other NFC stack failure
    #[error("NFC I/O failed: {0}")]
    Io(String),
}

impl From<NfcTagError> for Error {
    fn from(err: NfcTagError) -> Self {
        match err {
            NfcTagError::TagLost => Error::TransportIo("NFC tag lost".into()),
            NfcTagError::Io(msg) => Error::TransportIo(msg),
        }
    }
}

/// A connected ISO-DEP tag, as provided by the platform
pub trait IsoDepTag: Send + fmt::Debug {
    /// Exchange one raw APDU with the tag
    fn transceive(&mut self, data: &[u8]) -> std::result::Result<Vec<u8>, NfcTagError>;

    /// Whether the tag is still in the field, as far as the stack knows
    fn is_connected(&self) -> bool;

    /// Whether the tag supports extended-length APDUs
    fn is_extended_length_supported(&self) -> bool;

    /// The tag's anticollision identifier
    fn uid(&self) -> &[u8];
}

/// [`CardTransport`] over an ISO-DEP tag
pub struct NfcTransport<T: IsoDepTag> {
    tag: T,
    clock: Arc<dyn Clock>,
    last_transceive_ms: Arc<AtomicU64>,
    released: bool,
}

impl<T: IsoDepTag> fmt::Debug for NfcTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NfcTransport")
            .field("uid", &hex::encode(self.tag.uid()))
            .field("released", &self.released)
            .finish()
    }
}

impl<T: IsoDepTag> NfcTransport<T> {
    /// Wrap a connected tag
    pub fn new(tag: T, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            tag,
            clock,
            last_transceive_ms: Arc::new(AtomicU64::new(now)),
            released: false,
        }
    }

    /// Shared handle to the last-activity timestamp, for the liveness
    /// monitor. Updated on every exchange.
    pub fn last_transceive_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.last_transceive_ms)
    }

    /// The tag's anticollision identifier
    pub fn uid(&self) -> &[u8] {
        self.tag.uid()
    }
}

impl<T: IsoDepTag> CardTransport for NfcTransport<T> {
    fn do_transceive(&mut self, command: &Command) -> Result<Response> {
        let raw = self.tag.transceive(&command.to_bytes()).map_err(Error::from)?;
        self.last_transceive_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);
        Response::from_bytes(&raw)
    }

    fn is_extended_length_supported(&self) -> bool {
        self.tag.is_extended_length_supported()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Nfc
    }

    fn ping(&mut self) -> bool {
        if self.released || !self.tag.is_connected() {
            return false;
        }
        // a bare GET RESPONSE does not disturb applet state; any answer,
        // including an error status, proves the tag is still in the field
        match self.tag.transceive(&[0x00, 0xC0, 0x00, 0x00, 0x00]) {
            Ok(_) => {
                self.last_transceive_ms
                    .store(self.clock.now_ms(), Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!(uid = %hex::encode(self.tag.uid()), "NFC transport released");
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

//! Transport abstraction for APDU exchange with a security key
//!
//! A transport owns one link to one device (a CCID reader slot, a U2F HID
//! interface, or an NFC tag) and carries whole command/response APDUs.
//! Framing, timeouts, retries and power management are the transport's
//! private concern.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::response::Response;

/// The link layer a transport runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// USB CCID smartcard reader
    UsbCcid,
    /// USB U2F HID token
    UsbU2fHid,
    /// NFC ISO-DEP tag
    Nfc,
}

/// Trait for APDU transports
///
/// At most one APDU is in flight per transport; callers on shared
/// transports go through [`SharedTransport`], which fails fast with
/// [`Error::TransportBusy`] instead of queueing.
pub trait CardTransport: Send + fmt::Debug {
    /// Exchange one APDU with the device
    ///
    /// Checks the released flag and logs the exchange, then delegates to
    /// [`CardTransport::do_transceive`].
    fn transceive(&mut self, command: &Command) -> Result<Response> {
        if self.is_released() {
            return Err(Error::TransportReleased);
        }
        trace!(command = %hex::encode(command.to_bytes()), "APDU out");
        let result = self.do_transceive(command);
        match &result {
            Ok(response) => {
                let raw: Bytes = response.clone().into();
                trace!(response = %hex::encode(&raw), "APDU in");
            }
            Err(err) => debug!(error = %err, "APDU exchange failed"),
        }
        result
    }

    /// Transport-specific APDU exchange
    fn do_transceive(&mut self, command: &Command) -> Result<Response>;

    /// Whether extended-length APDUs can be carried on this link
    fn is_extended_length_supported(&self) -> bool;

    /// The link layer in use
    fn kind(&self) -> TransportKind;

    /// Cheap liveness probe; must not disturb applet state
    fn ping(&mut self) -> bool;

    /// Release the transport; idempotent. In-flight exchanges observe the
    /// flag at the next frame boundary and fail with
    /// [`Error::TransportReleased`].
    fn release(&mut self);

    /// Whether [`CardTransport::release`] has been called
    fn is_released(&self) -> bool;
}

/// A cloneable handle serialising access to a shared transport
///
/// All clones refer to the same underlying transport; an exchange started
/// while another is in flight fails with [`Error::TransportBusy`].
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn CardTransport>>>,
    kind: TransportKind,
}

impl SharedTransport {
    /// Wrap a transport for shared use
    pub fn new<T: CardTransport + 'static>(transport: T) -> Self {
        let kind = transport.kind();
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
            kind,
        }
    }
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransport")
            .field("kind", &self.kind)
            .finish()
    }
}

impl CardTransport for SharedTransport {
    fn do_transceive(&mut self, command: &Command) -> Result<Response> {
        let mut guard = self.inner.try_lock().map_err(|_| Error::TransportBusy)?;
        guard.transceive(command)
    }

    fn is_extended_length_supported(&self) -> bool {
        self.inner
            .lock()
            .map(|g| g.is_extended_length_supported())
            .unwrap_or(false)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn ping(&mut self) -> bool {
        match self.inner.try_lock() {
            Ok(mut guard) => guard.ping(),
            // an in-flight exchange implies the link is alive
            Err(_) => true,
        }
    }

    fn release(&mut self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.release();
        }
    }

    fn is_released(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => guard.is_released(),
            Err(_) => false,
        }
    }
}

/// Scripted transport for tests
///
/// Returns queued responses in order and records every command sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Responses to hand out, front first
    pub responses: Vec<Bytes>,
    /// Serialised commands observed
    pub commands: Vec<Bytes>,
    /// Claimed extended-length support
    pub extended_length: bool,
    released: bool,
}

impl MockTransport {
    /// Create a mock with the given response script
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    /// Create a mock that answers 90 00 once
    pub fn with_success() -> Self {
        Self::new(vec![Bytes::from_static(&[0x90, 0x00])])
    }
}

impl CardTransport for MockTransport {
    fn do_transceive(&mut self, command: &Command) -> Result<Response> {
        self.commands.push(command.to_bytes());
        if self.responses.is_empty() {
            return Err(Error::TransportIo("mock response script exhausted".into()));
        }
        Response::from_bytes(&self.responses.remove(0))
    }

    fn is_extended_length_supported(&self) -> bool {
        self.extended_length
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbCcid
    }

    fn ping(&mut self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_transport_fails_fast() {
        let mut mock = MockTransport::with_success();
        mock.release();
        mock.release(); // idempotent
        let err = mock.transceive(&Command::new(0x00, 0xA4, 0x04, 0x00));
        assert!(matches!(err, Err(Error::TransportReleased)));
    }

    #[test]
    fn test_mock_records_commands() {
        let mut mock = MockTransport::with_success();
        let cmd = Command::new(0x00, 0x20, 0x00, 0x81).with_data(b"123456".as_slice());
        let rsp = mock.transceive(&cmd).unwrap();
        assert!(rsp.is_success());
        assert_eq!(mock.commands.len(), 1);
        assert_eq!(mock.commands[0], cmd.to_bytes());
    }

    #[test]
    fn test_shared_transport_serialises() {
        let mut shared = SharedTransport::new(MockTransport::with_success());
        let mut clone = shared.clone();
        let rsp = shared
            .transceive(&Command::new(0x00, 0xA4, 0x04, 0x00))
            .unwrap();
        assert!(rsp.is_success());
        // script exhausted now, but the lock itself is free again
        assert!(clone
            .transceive(&Command::new(0x00, 0xA4, 0x04, 0x00))
            .is_err());
    }
}

//! U2F HID token transport
//!
//! Bridges the [`CardTransport`] interface onto the U2F HID frame protocol.
//! All APDUs are re-encoded in extended-length form before encapsulation in
//! a MSG transaction, as the U2F HID protocol requires.

pub mod protocol;
pub mod websafe;

use tracing::debug;

use keyfob_core::command::NE_MAX;
use keyfob_core::{CardTransport, Command, Error, Response, Result, TransportKind};

use crate::device::{UsbDeviceInfo, UsbDeviceIo};
use protocol::{U2fHidConfig, U2fHidProtocol};

/// HID report descriptor prefixes identifying the FIDO usage page
const FIDO_REPORT_PREFIXES: [&str; 2] = ["06d0f10901", "06d0f10a0100"];

/// [`CardTransport`] over a U2F HID token
#[derive(Debug)]
pub struct U2fHidTransport<D: UsbDeviceIo> {
    protocol: U2fHidProtocol<D>,
    info: UsbDeviceInfo,
    released: bool,
}

impl<D: UsbDeviceIo> U2fHidTransport<D> {
    /// Verify the interface is a FIDO token and allocate a channel
    pub fn connect(mut device: D, info: UsbDeviceInfo, config: U2fHidConfig) -> Result<Self> {
        check_fido_report_descriptor(&mut device)?;
        let protocol = U2fHidProtocol::connect(device, config)?;
        debug!(device = %info, cid = format_args!("{:#010x}", protocol.cid()), "U2F HID transport connected");
        Ok(Self {
            protocol,
            info,
            released: false,
        })
    }

    /// Identity of the underlying USB device
    pub fn device_info(&self) -> &UsbDeviceInfo {
        &self.info
    }
}

fn check_fido_report_descriptor<D: UsbDeviceIo>(device: &mut D) -> Result<()> {
    let descriptor = device
        .read_hid_report_descriptor()
        .map_err(Error::from)?;
    let descriptor_hex = hex::encode(&descriptor);
    if FIDO_REPORT_PREFIXES
        .iter()
        .any(|prefix| descriptor_hex.starts_with(prefix))
    {
        Ok(())
    } else {
        Err(Error::TransportIo(
            "HID report descriptor is not a FIDO usage page".into(),
        ))
    }
}

impl<D: UsbDeviceIo> CardTransport for U2fHidTransport<D> {
    fn do_transceive(&mut self, command: &Command) -> Result<Response> {
        // all U2F messages are encoded as extended-length APDUs
        let extended = command.clone().with_ne(NE_MAX);
        let raw = self.protocol.msg(&extended.to_bytes())?;
        Response::from_bytes(&raw)
    }

    fn is_extended_length_supported(&self) -> bool {
        true
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbU2fHid
    }

    fn ping(&mut self) -> bool {
        !self.released && self.protocol.ping().unwrap_or(false)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!(device = %self.info, "U2F HID transport released");
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

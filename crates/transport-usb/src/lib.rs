//! USB transports for security keys
//!
//! Two device families are supported:
//!
//! - CCID smartcard readers (interface class 0x0B), including host-side
//!   T=1 block framing for TPDU-level readers.
//! - U2F/FIDO HID tokens (interface class 0x03, FIDO usage page 0xF1D0).
//!
//! Platform code opens the device and hands the endpoints to this crate
//! via the [`UsbDeviceIo`] trait; everything above that line is portable.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod ccid;
pub mod device;
pub mod u2f;

pub use ccid::transceiver::{CcidConfig, CcidTransceiver};
pub use ccid::{CcidTransport, ExchangeLevel};
pub use device::{UsbDeviceInfo, UsbDeviceIo, UsbIoError};
pub use u2f::U2fHidTransport;
pub use u2f::protocol::{U2fHidConfig, U2fHidProtocol};

/// USB interface class of CCID smartcard readers
pub const USB_CLASS_CCID: u8 = 0x0B;
/// USB interface class of HID devices
pub const USB_CLASS_HID: u8 = 0x03;
/// HID usage page assigned to FIDO devices
pub const FIDO_USAGE_PAGE: u16 = 0xF1D0;

//! Collaborator interface to an opened USB device
//!
//! Platform code (libusb, Android, test harnesses) opens the device and
//! claims the interface; the transports only see these calls.

use std::fmt;
use std::time::Duration;

use keyfob_core::Error;
use thiserror::Error as ThisError;

/// Errors surfaced by the platform USB layer
#[derive(Debug, ThisError)]
pub enum UsbIoError {
    /// The transfer deadline elapsed
    #[error("USB transfer timed out")]
    Timeout,
    /// The device went away
    #[error("USB device disconnected")]
    Disconnected,
    /// Any other host-controller failure
    #[error("USB I/O failed: {0}")]
    Io(String),
}

impl From<UsbIoError> for Error {
    fn from(err: UsbIoError) -> Self {
        match err {
            UsbIoError::Timeout => Error::TransportTimeout,
            UsbIoError::Disconnected => Error::TransportIo("device disconnected".into()),
            UsbIoError::Io(msg) => Error::TransportIo(msg),
        }
    }
}

/// An opened USB device with a claimed CCID or HID interface
pub trait UsbDeviceIo: Send + fmt::Debug {
    /// Write to the interface's OUT endpoint; returns bytes written
    fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, UsbIoError>;

    /// Read from the interface's IN endpoint; returns bytes read
    fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbIoError>;

    /// Fetch the HID report descriptor over the control pipe
    fn read_hid_report_descriptor(&mut self) -> Result<Vec<u8>, UsbIoError>;
}

/// Identity of an attached USB device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDeviceInfo {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// iSerialNumber string, if the device reports one
    pub serial: Option<String>,
}

impl UsbDeviceInfo {
    /// Stable identifier used to deduplicate discoveries
    pub fn identifier(&self) -> String {
        format!(
            "{:04x}:{:04x}:{}",
            self.vendor_id,
            self.product_id,
            self.serial.as_deref().unwrap_or("-")
        )
    }
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

//! CCID smartcard reader transport
//!
//! Wraps a [`CcidTransceiver`] in the [`CardTransport`] interface. The
//! exchange level of the reader (from the CCID class descriptor's
//! `dwFeatures`) decides how APDUs map onto xfrBlock messages:
//!
//! - `ShortApdu`: the reader runs T=1 itself; one xfrBlock per APDU.
//! - `ExtendedApdu`: like `ShortApdu`, but APDUs larger than the reader's
//!   buffer are split across xfrBlocks with data-block level parameters.
//! - `Tpdu`: the host runs T=1; each xfrBlock carries one T=1 block.

pub mod t1;
pub mod transceiver;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use keyfob_core::{CardTransport, Command, Error, Response, Result, TransportKind};

use crate::device::{UsbDeviceInfo, UsbDeviceIo};
use t1::{T1Config, T1Protocol};
use transceiver::{CcidConfig, CcidTransceiver, level};

/// How the reader exchanges APDUs, per its class descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeLevel {
    /// Reader handles T=1; short APDUs only
    ShortApdu,
    /// Reader handles T=1; extended APDUs split across blocks
    ExtendedApdu,
    /// Host handles T=1 block framing
    Tpdu,
}

impl ExchangeLevel {
    /// Derive the level from the CCID class descriptor's dwFeatures
    pub const fn from_features(dw_features: u32) -> Self {
        if dw_features & 0x0004_0000 != 0 {
            Self::ExtendedApdu
        } else if dw_features & 0x0002_0000 != 0 {
            Self::ShortApdu
        } else {
            Self::Tpdu
        }
    }
}

#[derive(Debug)]
enum Protocol {
    ShortApdu,
    ExtendedApdu,
    Tpdu(T1Protocol),
}

/// [`CardTransport`] over a USB CCID reader slot
#[derive(Debug)]
pub struct CcidTransport<D: UsbDeviceIo> {
    transceiver: CcidTransceiver<D>,
    protocol: Protocol,
    info: UsbDeviceInfo,
    atr: Bytes,
    released: bool,
}

impl<D: UsbDeviceIo> CcidTransport<D> {
    /// Power the slot on and set up the exchange protocol
    pub fn connect(
        device: D,
        info: UsbDeviceInfo,
        exchange_level: ExchangeLevel,
        config: CcidConfig,
    ) -> Result<Self> {
        let mut transceiver = CcidTransceiver::new(device, config);
        let atr = transceiver.icc_power_on()?;
        debug!(device = %info, level = ?exchange_level, "CCID transport connected");

        let protocol = match exchange_level {
            ExchangeLevel::ShortApdu => Protocol::ShortApdu,
            ExchangeLevel::ExtendedApdu => Protocol::ExtendedApdu,
            ExchangeLevel::Tpdu => {
                let mut t1 = T1Protocol::new(&atr, T1Config::default());
                t1.negotiate_ifsd(&mut transceiver);
                Protocol::Tpdu(t1)
            }
        };

        Ok(Self {
            transceiver,
            protocol,
            info,
            atr,
            released: false,
        })
    }

    /// The ATR returned at power-on
    pub fn atr(&self) -> &Bytes {
        &self.atr
    }

    /// Identity of the underlying USB device
    pub fn device_info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    /// Send an APDU split across xfrBlocks with level parameters, then
    /// pull response continuations until the reader reports the last one.
    fn transceive_extended(&mut self, apdu: &[u8]) -> Result<Bytes> {
        let max = self.transceiver.config().max_xfr_data.max(1);
        let chunks: Vec<&[u8]> = apdu.chunks(max).collect();
        let last = chunks.len() - 1;

        let mut response = BytesMut::new();
        let mut block = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let lvl = match (chunks.len(), i) {
                (1, _) => level::SINGLE,
                (_, 0) => level::FIRST,
                (_, n) if n == last => level::LAST,
                _ => level::MIDDLE,
            };
            block = Some(self.transceiver.xfr_block(chunk, lvl)?);
        }

        let mut block = block.ok_or(Error::ApduMalformed("empty APDU"))?;
        loop {
            response.extend_from_slice(&block.data);
            match block.chain_parameter as u16 {
                x if x == level::SINGLE || x == level::LAST => break,
                x if x == level::FIRST || x == level::MIDDLE => {
                    block = self.transceiver.xfr_block(&[], level::CONTINUE)?;
                }
                _ => return Err(Error::CcidBadResponse("invalid chain parameter")),
            }
        }
        Ok(response.freeze())
    }
}

impl<D: UsbDeviceIo> CardTransport for CcidTransport<D> {
    fn do_transceive(&mut self, command: &Command) -> Result<Response> {
        let apdu = command.to_bytes();
        let raw = match &mut self.protocol {
            Protocol::ShortApdu => self.transceiver.xfr_block(&apdu, level::SINGLE)?.data,
            Protocol::ExtendedApdu => self.transceive_extended(&apdu)?,
            Protocol::Tpdu(t1) => t1.transceive(&mut self.transceiver, &apdu)?,
        };
        Response::from_bytes(&raw)
    }

    fn is_extended_length_supported(&self) -> bool {
        !matches!(self.protocol, Protocol::ShortApdu)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbCcid
    }

    fn ping(&mut self) -> bool {
        !self.released && self.transceiver.get_parameters().is_ok()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.transceiver.icc_power_off();
            debug!(device = %self.info, "CCID transport released");
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

//! CCID message transceiver
//!
//! Frames PC_to_RDR messages onto the bulk-out pipe and reads the matching
//! RDR_to_PC messages back, handling sequence numbering, time-extension
//! requests and hardware error reporting for a single slot (slot 0).

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use keyfob_core::{Error, Result};

use crate::device::UsbDeviceIo;

const PC_TO_RDR_ICC_POWER_ON: u8 = 0x62;
const PC_TO_RDR_ICC_POWER_OFF: u8 = 0x63;
const PC_TO_RDR_XFR_BLOCK: u8 = 0x6F;
const PC_TO_RDR_SET_PARAMETERS: u8 = 0x61;
const PC_TO_RDR_GET_PARAMETERS: u8 = 0x6C;

const RDR_TO_PC_DATA_BLOCK: u8 = 0x80;
const RDR_TO_PC_SLOT_STATUS: u8 = 0x81;
const RDR_TO_PC_PARAMETERS: u8 = 0x82;

const HEADER_LEN: usize = 10;
const SLOT: u8 = 0x00;

/// Data-block level parameter values for extended-APDU exchanges
pub mod level {
    /// The block carries a complete APDU
    pub const SINGLE: u16 = 0x0000;
    /// First block of a multi-block APDU
    pub const FIRST: u16 = 0x0001;
    /// Last block of a multi-block APDU
    pub const LAST: u16 = 0x0002;
    /// Intermediate block of a multi-block APDU
    pub const MIDDLE: u16 = 0x0003;
    /// Empty block requesting the next response chunk
    pub const CONTINUE: u16 = 0x0010;
}

/// Tuning knobs for the CCID link
#[derive(Debug, Clone)]
pub struct CcidConfig {
    /// Deadline for a single bulk transfer
    pub bulk_timeout: Duration,
    /// Largest data field sent per xfrBlock in extended-APDU exchanges
    pub max_xfr_data: usize,
}

impl Default for CcidConfig {
    fn default() -> Self {
        Self {
            bulk_timeout: Duration::from_secs(2),
            max_xfr_data: 256,
        }
    }
}

/// One RDR_to_PC_DataBlock
#[derive(Debug, Clone)]
pub struct CcidDataBlock {
    /// The abData field
    pub data: Bytes,
    /// bChainParameter: whether the response APDU continues
    pub chain_parameter: u8,
}

/// CCID message pump for one reader slot
#[derive(Debug)]
pub struct CcidTransceiver<D: UsbDeviceIo> {
    device: D,
    config: CcidConfig,
    seq: u8,
}

impl<D: UsbDeviceIo> CcidTransceiver<D> {
    /// Create a transceiver over an opened CCID interface
    pub fn new(device: D, config: CcidConfig) -> Self {
        Self {
            device,
            config,
            seq: 0,
        }
    }

    /// Configured limits
    pub fn config(&self) -> &CcidConfig {
        &self.config
    }

    /// Consume the transceiver and return the device
    pub fn into_device(self) -> D {
        self.device
    }

    /// Power the slot on and return the ATR
    pub fn icc_power_on(&mut self) -> Result<Bytes> {
        // bPowerSelect 0 = automatic voltage selection
        let msg = self.message(PC_TO_RDR_ICC_POWER_ON, &[], [0x00, 0x00, 0x00]);
        let (header, data) = self.exchange(msg, RDR_TO_PC_DATA_BLOCK)?;
        let _ = header;
        debug!(atr = %hex::encode(&data), "slot powered on");
        Ok(data)
    }

    /// Power the slot off
    pub fn icc_power_off(&mut self) -> Result<()> {
        let msg = self.message(PC_TO_RDR_ICC_POWER_OFF, &[], [0x00, 0x00, 0x00]);
        self.exchange(msg, RDR_TO_PC_SLOT_STATUS)?;
        Ok(())
    }

    /// Exchange one data block with the slot
    pub fn xfr_block(&mut self, data: &[u8], level_parameter: u16) -> Result<CcidDataBlock> {
        let level = level_parameter.to_le_bytes();
        let msg = self.message(PC_TO_RDR_XFR_BLOCK, data, [0x00, level[0], level[1]]);
        let (header, data) = self.exchange(msg, RDR_TO_PC_DATA_BLOCK)?;
        Ok(CcidDataBlock {
            data,
            chain_parameter: header.param,
        })
    }

    /// Push T=1 protocol parameters to the reader
    pub fn set_parameters_t1(&mut self, protocol_data: [u8; 7]) -> Result<Bytes> {
        // bProtocolNum = 1
        let msg = self.message(PC_TO_RDR_SET_PARAMETERS, &protocol_data, [0x01, 0x00, 0x00]);
        let (_, data) = self.exchange(msg, RDR_TO_PC_PARAMETERS)?;
        Ok(data)
    }

    /// Read the slot's current protocol parameters
    pub fn get_parameters(&mut self) -> Result<Bytes> {
        let msg = self.message(PC_TO_RDR_GET_PARAMETERS, &[], [0x00, 0x00, 0x00]);
        let (_, data) = self.exchange(msg, RDR_TO_PC_PARAMETERS)?;
        Ok(data)
    }

    fn message(&mut self, msg_type: u8, data: &[u8], specific: [u8; 3]) -> Bytes {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
        buf.put_u8(msg_type);
        buf.put_u32_le(data.len() as u32);
        buf.put_u8(SLOT);
        buf.put_u8(seq);
        buf.put_slice(&specific);
        buf.put_slice(data);
        buf.freeze()
    }

    /// Send one message and read the reader's answer, looping on
    /// time-extension notifications.
    fn exchange(&mut self, msg: Bytes, expected_type: u8) -> Result<(ResponseHeader, Bytes)> {
        let sent_seq = msg[6];
        trace!(msg = %hex::encode(&msg), "CCID out");
        self.device
            .bulk_out(&msg, self.config.bulk_timeout)
            .map_err(Error::from)?;

        loop {
            let (header, data) = self.read_message()?;
            trace!(
                msg_type = format_args!("{:#04x}", header.msg_type),
                status = header.status,
                error = header.error,
                len = data.len(),
                "CCID in"
            );

            if header.seq != sent_seq {
                return Err(Error::CcidSeqMismatch {
                    expected: sent_seq,
                    actual: header.seq,
                });
            }

            match header.command_status() {
                // processed without error
                0 => {
                    if header.msg_type != expected_type {
                        return Err(Error::CcidBadResponse("unexpected message type"));
                    }
                    return Ok((header, data));
                }
                // failed; bError says why
                1 => return Err(Error::CcidHwError { code: header.error }),
                // time extension requested; keep reading
                2 => {
                    warn!(bwi = header.error, "CCID time extension requested");
                    continue;
                }
                _ => return Err(Error::CcidBadResponse("reserved command status")),
            }
        }
    }

    /// Read one complete RDR_to_PC message, reassembling across bulk
    /// transfers when the payload exceeds a single transfer.
    fn read_message(&mut self) -> Result<(ResponseHeader, Bytes)> {
        let deadline = Instant::now() + self.config.bulk_timeout;
        let mut buf = vec![0u8; HEADER_LEN + 65544];
        let mut filled = 0;

        while filled < HEADER_LEN {
            filled += self.read_some(&mut buf[filled..], deadline)?;
        }

        let header = ResponseHeader::parse(&buf[..HEADER_LEN])?;
        let total = HEADER_LEN + header.length;
        if total > buf.len() {
            return Err(Error::CcidBadResponse("dwLength exceeds maximum"));
        }
        while filled < total {
            filled += self.read_some(&mut buf[filled..total], deadline)?;
        }

        let data = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
        Ok((header, data))
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::TransportTimeout)?;
        let n = self
            .device
            .bulk_in(buf, remaining)
            .map_err(Error::from)?;
        if n == 0 {
            return Err(Error::CcidBadResponse("zero-length bulk transfer"));
        }
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy)]
struct ResponseHeader {
    msg_type: u8,
    length: usize,
    seq: u8,
    status: u8,
    error: u8,
    param: u8,
}

impl ResponseHeader {
    fn parse(raw: &[u8]) -> Result<Self> {
        debug_assert!(raw.len() >= HEADER_LEN);
        let length = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;
        if raw[5] != SLOT {
            return Err(Error::CcidBadResponse("response for wrong slot"));
        }
        Ok(Self {
            msg_type: raw[0],
            length,
            seq: raw[6],
            status: raw[7],
            error: raw[8],
            param: raw[9],
        })
    }

    /// bmCommandStatus bits of bStatus
    const fn command_status(&self) -> u8 {
        self.status >> 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::result::Result;
    use crate::device::UsbIoError;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted bulk-in transfers and records bulk-out messages.
    #[derive(Debug, Default)]
    struct ScriptedUsb {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl ScriptedUsb {
        fn reply(&mut self, msg_type: u8, seq: u8, status: u8, error: u8, data: &[u8]) {
            let mut msg = vec![msg_type];
            msg.extend_from_slice(&(data.len() as u32).to_le_bytes());
            msg.push(0x00);
            msg.push(seq);
            msg.push(status);
            msg.push(error);
            msg.push(0x00);
            msg.extend_from_slice(data);
            self.replies.push_back(msg);
        }
    }

    impl UsbDeviceIo for ScriptedUsb {
        fn bulk_out(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, UsbIoError> {
            self.sent.push(data.to_vec());
            Ok(data.len())
        }

        fn bulk_in(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, UsbIoError> {
            let msg = self.replies.pop_front().ok_or(UsbIoError::Timeout)?;
            buf[..msg.len()].copy_from_slice(&msg);
            Ok(msg.len())
        }

        fn read_hid_report_descriptor(&mut self) -> Result<Vec<u8>, UsbIoError> {
            Err(UsbIoError::Io("not a HID device".into()))
        }
    }

    #[test]
    fn test_power_on_returns_atr() {
        let mut usb = ScriptedUsb::default();
        let atr = [0x3B, 0xDA, 0x18, 0xFF, 0x81, 0xB1];
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x00, 0x00, &atr);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        let got = xcvr.icc_power_on().unwrap();
        assert_eq!(got.as_ref(), atr);
    }

    #[test]
    fn test_seq_is_echoed_and_incremented() {
        let mut usb = ScriptedUsb::default();
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x00, 0x00, &[0x90, 0x00]);
        usb.reply(RDR_TO_PC_DATA_BLOCK, 1, 0x00, 0x00, &[0x90, 0x00]);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        xcvr.xfr_block(&[0x00, 0xA4, 0x04, 0x00], level::SINGLE)
            .unwrap();
        xcvr.xfr_block(&[0x00, 0xC0, 0x00, 0x00], level::SINGLE)
            .unwrap();
    }

    #[test]
    fn test_seq_mismatch_detected() {
        let mut usb = ScriptedUsb::default();
        usb.reply(RDR_TO_PC_DATA_BLOCK, 7, 0x00, 0x00, &[0x90, 0x00]);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        let err = xcvr.xfr_block(&[0x00], level::SINGLE).unwrap_err();
        assert!(matches!(
            err,
            Error::CcidSeqMismatch {
                expected: 0,
                actual: 7
            }
        ));
    }

    #[test]
    fn test_hardware_error_mapped() {
        let mut usb = ScriptedUsb::default();
        // bmCommandStatus = 1 (failed), bError = 0xFE (ICC mute)
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x40, 0xFE, &[]);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        let err = xcvr.xfr_block(&[0x00], level::SINGLE).unwrap_err();
        assert!(matches!(err, Error::CcidHwError { code: 0xFE }));
    }

    #[test]
    fn test_time_extension_keeps_waiting() {
        let mut usb = ScriptedUsb::default();
        // bmCommandStatus = 2 (time extension), then the real answer
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x80, 0x01, &[]);
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x00, 0x00, &[0x61, 0x10]);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        let block = xcvr.xfr_block(&[0x00], level::SINGLE).unwrap();
        assert_eq!(block.data.as_ref(), [0x61, 0x10]);
    }

    #[test]
    fn test_wire_format_of_xfr_block() {
        let mut usb = ScriptedUsb::default();
        usb.reply(RDR_TO_PC_DATA_BLOCK, 0, 0x00, 0x00, &[0x90, 0x00]);

        let mut xcvr = CcidTransceiver::new(usb, CcidConfig::default());
        xcvr.xfr_block(&[0xAA, 0xBB], level::FIRST).unwrap();

        let sent = &xcvr.device.sent[0];
        assert_eq!(sent[0], PC_TO_RDR_XFR_BLOCK);
        assert_eq!(&sent[1..5], &2u32.to_le_bytes());
        assert_eq!(sent[5], 0x00); // slot
        assert_eq!(sent[6], 0x00); // seq
        assert_eq!(sent[7], 0x00); // bBWI
        assert_eq!(&sent[8..10], &[0x01, 0x00]); // level, little-endian
        assert_eq!(&sent[10..], &[0xAA, 0xBB]);
    }
}

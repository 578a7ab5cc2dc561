//! U2F HID channelised frame protocol (FIDO U2F v1.2 §2)
//!
//! All traffic rides on 64-byte HID reports. A transaction starts with an
//! initialisation frame carrying the command and total length, followed by
//! continuation frames with a running sequence number. Channels are
//! allocated by CMD_INIT on the broadcast channel.

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use tracing::{debug, trace};

use keyfob_core::{Error, Result, U2fHidErrorCode};

use crate::device::UsbDeviceIo;

/// Fixed HID report size
pub const REPORT_SIZE: usize = 64;
/// Payload capacity of an initialisation frame
pub const INIT_DATA_LEN: usize = REPORT_SIZE - 7;
/// Payload capacity of a continuation frame
pub const CONT_DATA_LEN: usize = REPORT_SIZE - 5;

/// Broadcast channel for CMD_INIT
pub const CID_BROADCAST: u32 = 0xFFFF_FFFF;

/// Frame commands
pub mod cmd {
    /// Echo payload
    pub const PING: u8 = 0x81;
    /// Keepalive/processing notification (device needs more time)
    pub const KEEPALIVE: u8 = 0x82;
    /// Encapsulated U2F message (an APDU)
    pub const MSG: u8 = 0x83;
    /// Channel allocation
    pub const INIT: u8 = 0x86;
    /// Error notification
    pub const ERROR: u8 = 0xBF;
}

const TYPE_INIT: u8 = 0x80;
const ERR_CHANNEL_BUSY: u8 = 0x06;

/// Timeouts for U2F HID transactions
#[derive(Debug, Clone)]
pub struct U2fHidConfig {
    /// Default transaction deadline
    pub command_timeout: Duration,
    /// Deadline once the device signalled KEEPALIVE (user presence checks)
    pub user_presence_timeout: Duration,
    /// Deadline for a single report read
    pub report_timeout: Duration,
}

impl Default for U2fHidConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(3),
            user_presence_timeout: Duration::from_secs(30),
            report_timeout: Duration::from_millis(500),
        }
    }
}

/// Split a payload into init + continuation reports
///
/// Frames are always exactly [`REPORT_SIZE`] bytes, zero-padded.
pub fn encode_frames(cid: u32, command: u8, payload: &[u8]) -> Vec<[u8; REPORT_SIZE]> {
    debug_assert!(payload.len() <= u16::MAX as usize);
    let mut frames = Vec::with_capacity(1 + payload.len().saturating_sub(INIT_DATA_LEN) / CONT_DATA_LEN + 1);

    let mut frame = [0u8; REPORT_SIZE];
    frame[..4].copy_from_slice(&cid.to_be_bytes());
    frame[4] = command | TYPE_INIT;
    frame[5] = (payload.len() >> 8) as u8;
    frame[6] = payload.len() as u8;
    let first = payload.len().min(INIT_DATA_LEN);
    frame[7..7 + first].copy_from_slice(&payload[..first]);
    frames.push(frame);

    let mut offset = first;
    let mut seq = 0u8;
    while offset < payload.len() {
        let mut frame = [0u8; REPORT_SIZE];
        frame[..4].copy_from_slice(&cid.to_be_bytes());
        frame[4] = seq;
        let n = (payload.len() - offset).min(CONT_DATA_LEN);
        frame[5..5 + n].copy_from_slice(&payload[offset..offset + n]);
        frames.push(frame);
        offset += n;
        seq += 1;
    }

    frames
}

/// Incremental reassembly of one response transaction
#[derive(Debug)]
pub struct FrameAssembler {
    cid: u32,
    command: Option<u8>,
    expected_len: usize,
    next_seq: u8,
    buffer: BytesMut,
}

impl FrameAssembler {
    /// Start assembling a transaction on the given channel
    pub fn new(cid: u32) -> Self {
        Self {
            cid,
            command: None,
            expected_len: 0,
            next_seq: 0,
            buffer: BytesMut::new(),
        }
    }

    /// Feed one report; returns the command and payload once complete.
    /// Frames for other channels are ignored.
    pub fn feed(&mut self, frame: &[u8; REPORT_SIZE]) -> Result<Option<(u8, Bytes)>> {
        let cid = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if cid != self.cid {
            trace!(cid, "ignoring frame for foreign channel");
            return Ok(None);
        }

        if self.command.is_none() {
            if frame[4] & TYPE_INIT == 0 {
                // continuation without an initialisation frame
                return Err(Error::U2fHidError {
                    code: U2fHidErrorCode::InvalidSeq,
                });
            }
            self.command = Some(frame[4]);
            self.expected_len = ((frame[5] as usize) << 8) | frame[6] as usize;
            let n = self.expected_len.min(INIT_DATA_LEN);
            self.buffer.put_slice(&frame[7..7 + n]);
        } else {
            if frame[4] & TYPE_INIT != 0 {
                return Err(Error::U2fHidError {
                    code: U2fHidErrorCode::InvalidSeq,
                });
            }
            if frame[4] != self.next_seq {
                return Err(Error::U2fHidError {
                    code: U2fHidErrorCode::InvalidSeq,
                });
            }
            self.next_seq += 1;
            let n = (self.expected_len - self.buffer.len()).min(CONT_DATA_LEN);
            self.buffer.put_slice(&frame[5..5 + n]);
        }

        if self.buffer.len() >= self.expected_len {
            let command = self.command.take().unwrap_or(0);
            let payload = std::mem::take(&mut self.buffer).freeze();
            return Ok(Some((command, payload)));
        }
        Ok(None)
    }
}

/// Channel state and transaction pump for one U2F HID device
#[derive(Debug)]
pub struct U2fHidProtocol<D: UsbDeviceIo> {
    device: D,
    config: U2fHidConfig,
    cid: u32,
    /// Protocol version reported by CMD_INIT
    pub protocol_version: u8,
    /// Device version (major, minor, build) reported by CMD_INIT
    pub device_version: (u8, u8, u8),
    /// Capability flags reported by CMD_INIT
    pub capabilities: u8,
}

impl<D: UsbDeviceIo> U2fHidProtocol<D> {
    /// Allocate a channel with CMD_INIT on the broadcast CID
    pub fn connect(device: D, config: U2fHidConfig) -> Result<Self> {
        let mut proto = Self {
            device,
            config,
            cid: CID_BROADCAST,
            protocol_version: 0,
            device_version: (0, 0, 0),
            capabilities: 0,
        };

        let mut nonce = [0u8; 8];
        rand::rng().fill_bytes(&mut nonce);

        proto.write_frames(cmd::INIT, &nonce)?;
        let deadline = Instant::now() + proto.config.command_timeout;
        loop {
            let (command, payload) = proto.read_transaction(CID_BROADCAST, deadline)?;
            if command != cmd::INIT {
                continue;
            }
            if payload.len() < 17 {
                return Err(Error::U2fHidBadInit("INIT response too short"));
            }
            if payload[..8] != nonce {
                // response to someone else's INIT; keep listening
                debug!("INIT nonce mismatch, ignoring");
                continue;
            }
            proto.cid = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
            proto.protocol_version = payload[12];
            proto.device_version = (payload[13], payload[14], payload[15]);
            proto.capabilities = payload[16];
            debug!(
                cid = format_args!("{:#010x}", proto.cid),
                protocol = proto.protocol_version,
                "U2F HID channel allocated"
            );
            return Ok(proto);
        }
    }

    /// The allocated channel id
    pub const fn cid(&self) -> u32 {
        self.cid
    }

    /// Run one MSG transaction carrying an encapsulated APDU
    pub fn msg(&mut self, apdu: &[u8]) -> Result<Bytes> {
        self.transaction(cmd::MSG, apdu)
    }

    /// Run one PING transaction; true if the device echoed the payload
    pub fn ping(&mut self) -> Result<bool> {
        let mut payload = [0u8; 8];
        rand::rng().fill_bytes(&mut payload);
        let echo = self.transaction(cmd::PING, &payload)?;
        Ok(echo.as_ref() == payload)
    }

    /// Write a request and read its response, handling KEEPALIVE and ERROR
    fn transaction(&mut self, command: u8, payload: &[u8]) -> Result<Bytes> {
        self.write_frames(command, payload)?;

        let mut deadline = Instant::now() + self.config.command_timeout;
        loop {
            let (rsp_command, rsp_payload) = self.read_transaction(self.cid, deadline)?;
            match rsp_command {
                c if c == command => return Ok(rsp_payload),
                cmd::KEEPALIVE => {
                    // device is waiting (e.g. user presence); extend once
                    trace!("KEEPALIVE received, extending deadline");
                    deadline = deadline.max(Instant::now() + self.config.user_presence_timeout);
                }
                cmd::ERROR => {
                    let code = rsp_payload.first().copied().unwrap_or(0);
                    return Err(if code == ERR_CHANNEL_BUSY {
                        Error::U2fHidChannelBusy
                    } else {
                        Error::U2fHidError { code: code.into() }
                    });
                }
                other => {
                    debug!(command = format_args!("{:#04x}", other), "unexpected frame command");
                    return Err(Error::TransportIo("unexpected U2F HID response".into()));
                }
            }
        }
    }

    fn write_frames(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        for frame in encode_frames(self.cid, command, payload) {
            self.device
                .bulk_out(&frame, self.config.report_timeout)
                .map_err(Error::from)?;
        }
        Ok(())
    }

    /// Read reports until one full transaction on `cid` assembles
    fn read_transaction(&mut self, cid: u32, deadline: Instant) -> Result<(u8, Bytes)> {
        let mut assembler = FrameAssembler::new(cid);
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::TransportTimeout)?;
            let timeout = remaining.min(self.config.report_timeout);

            let mut frame = [0u8; REPORT_SIZE];
            let n = match self.device.bulk_in(&mut frame, timeout) {
                Ok(n) => n,
                Err(crate::device::UsbIoError::Timeout) => continue,
                Err(err) => return Err(err.into()),
            };
            if n != REPORT_SIZE {
                return Err(Error::TransportIo("short HID report".into()));
            }
            if let Some(done) = assembler.feed(&frame)? {
                return Ok(done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_payload() {
        let frames = encode_frames(0xAABBCCDD, cmd::MSG, &[0x01, 0x02, 0x03]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..4], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(frames[0][4], cmd::MSG);
        assert_eq!(frames[0][5], 0x00);
        assert_eq!(frames[0][6], 0x03);
        assert_eq!(&frames[0][7..10], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_boundary_payload_fits_one_frame() {
        let frames = encode_frames(1, cmd::MSG, &vec![0xAA; INIT_DATA_LEN]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_frame_count_and_sequence_numbers() {
        // S > 57 needs ceil((S - 57) / 59) continuation frames
        for size in [58usize, 57 + 59, 57 + 59 + 1, 1024] {
            let payload = vec![0x5A; size];
            let frames = encode_frames(2, cmd::MSG, &payload);
            let expected_cont = size.saturating_sub(INIT_DATA_LEN).div_ceil(CONT_DATA_LEN);
            assert_eq!(frames.len(), 1 + expected_cont, "size {}", size);
            for (i, frame) in frames[1..].iter().enumerate() {
                assert_eq!(frame[4], i as u8);
            }
        }
    }

    #[test]
    fn test_assembler_round_trip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let frames = encode_frames(7, cmd::MSG, &payload);

        let mut assembler = FrameAssembler::new(7);
        let mut result = None;
        for frame in &frames {
            result = assembler.feed(frame).unwrap();
        }
        let (command, assembled) = result.expect("transaction complete");
        assert_eq!(command, cmd::MSG);
        assert_eq!(assembled.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_assembler_ignores_foreign_cid() {
        let frames = encode_frames(9, cmd::MSG, &[0x01]);
        let mut assembler = FrameAssembler::new(7);
        assert!(assembler.feed(&frames[0]).unwrap().is_none());
    }

    #[test]
    fn test_assembler_rejects_bad_seq() {
        let payload = vec![0x11; 200];
        let frames = encode_frames(7, cmd::MSG, &payload);
        let mut assembler = FrameAssembler::new(7);
        assembler.feed(&frames[0]).unwrap();
        // skip frames[1], feed frames[2]
        let err = assembler.feed(&frames[2]).unwrap_err();
        assert!(matches!(
            err,
            Error::U2fHidError {
                code: U2fHidErrorCode::InvalidSeq
            }
        ));
    }
}

//! ISO 7816-3 T=1 block protocol, run host-side over a TPDU-level reader
//!
//! Each xfrBlock carries exactly one T=1 block: `NAD | PCB | LEN | INF |
//! EDC`. The host chains outgoing APDUs at the card's IFSC, acknowledges
//! incoming chains with R-blocks, honours WTX and IFS requests and
//! retransmits on EDC failures.

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use keyfob_core::{Error, Result};

use super::transceiver::{CcidTransceiver, level};
use crate::device::UsbDeviceIo;

const NAD_HOST_TO_CARD: u8 = 0x00;

/// Default information field size until the card raises it
const IFSC_DEFAULT: usize = 32;
/// Largest information field the protocol allows
const IFS_MAX: usize = 254;
/// IFSD announced to the card at connect time
const IFSD_ANNOUNCED: u8 = 0xFE;

const PCB_R_MASK: u8 = 0xC0;
const PCB_R_BITS: u8 = 0x80;
const PCB_S_BITS: u8 = 0xC0;
const PCB_S_RESPONSE: u8 = 0x20;

const S_RESYNCH: u8 = 0x00;
const S_IFS: u8 = 0x01;
const S_ABORT: u8 = 0x02;
const S_WTX: u8 = 0x03;

const MAX_RETRANSMITS: usize = 3;

/// Error detection code in use, chosen from the ATR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edc {
    /// Longitudinal redundancy check, one XOR byte (default)
    Lrc,
    /// CRC-16, two bytes
    Crc,
}

impl Edc {
    /// Walk the ATR's interface-byte chain; the first TC byte of a T=1
    /// group selects CRC when its low bit is set.
    pub fn from_atr(atr: &[u8]) -> Self {
        let Some(&t0) = atr.get(1) else {
            return Self::Lrc;
        };
        let mut td = t0;
        let mut idx = 2usize;
        let mut global = true;
        loop {
            let ta = td & 0x10 != 0;
            let tb = td & 0x20 != 0;
            let tc = td & 0x40 != 0;
            let has_td = td & 0x80 != 0;

            if !global && td & 0x0F == 1 && tc {
                let tc_idx = idx + ta as usize + tb as usize;
                return match atr.get(tc_idx) {
                    Some(byte) if byte & 0x01 != 0 => Self::Crc,
                    _ => Self::Lrc,
                };
            }

            idx += ta as usize + tb as usize + tc as usize;
            if !has_td {
                return Self::Lrc;
            }
            let Some(&next) = atr.get(idx) else {
                return Self::Lrc;
            };
            td = next;
            idx += 1;
            global = false;
        }
    }

    fn len(self) -> usize {
        match self {
            Self::Lrc => 1,
            Self::Crc => 2,
        }
    }
}

fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// CRC-16 as used by ISO 7816-3 (CCITT polynomial, initial 0xFFFF)
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// A decoded T=1 block
#[derive(Debug, Clone)]
enum Block {
    /// Information block: send-sequence bit, more-data bit, payload
    I { n: u8, more: bool, inf: Bytes },
    /// Receive-ready block: expected sequence and error bits
    R { n: u8, error: u8 },
    /// Supervisory block: type, response flag, payload
    S { kind: u8, response: bool, inf: Bytes },
}

fn encode_block(pcb: u8, inf: &[u8], edc: Edc) -> Bytes {
    debug_assert!(inf.len() <= IFS_MAX);
    let mut buf = BytesMut::with_capacity(3 + inf.len() + edc.len());
    buf.put_u8(NAD_HOST_TO_CARD);
    buf.put_u8(pcb);
    buf.put_u8(inf.len() as u8);
    buf.put_slice(inf);
    match edc {
        Edc::Lrc => {
            let check = lrc(&buf);
            buf.put_u8(check);
        }
        Edc::Crc => {
            let check = crc16(&buf);
            buf.put_u16(check);
        }
    }
    buf.freeze()
}

fn decode_block(raw: &[u8], edc: Edc) -> Result<Block> {
    if raw.len() < 3 + edc.len() {
        return Err(Error::T1Framing("block shorter than prologue"));
    }
    let len = raw[2] as usize;
    let expected = 3 + len + edc.len();
    if raw.len() < expected {
        return Err(Error::T1Framing("block shorter than LEN field claims"));
    }
    let body = &raw[..3 + len];
    let edc_ok = match edc {
        Edc::Lrc => lrc(body) == raw[3 + len],
        Edc::Crc => {
            crc16(body) == u16::from_be_bytes([raw[3 + len], raw[3 + len + 1]])
        }
    };
    if !edc_ok {
        return Err(Error::T1BadEdc);
    }

    let pcb = raw[1];
    let inf = Bytes::copy_from_slice(&raw[3..3 + len]);
    if pcb & 0x80 == 0 {
        Ok(Block::I {
            n: (pcb >> 6) & 0x01,
            more: pcb & 0x20 != 0,
            inf,
        })
    } else if pcb & PCB_R_MASK == PCB_R_BITS {
        Ok(Block::R {
            n: (pcb >> 4) & 0x01,
            error: pcb & 0x03,
        })
    } else {
        Ok(Block::S {
            kind: pcb & 0x1F,
            response: pcb & PCB_S_RESPONSE != 0,
            inf,
        })
    }
}

/// Tuning knobs for the T=1 layer
#[derive(Debug, Clone)]
pub struct T1Config {
    /// Deadline for one block exchange including retransmissions
    pub block_timeout: Duration,
}

impl Default for T1Config {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_secs(5),
        }
    }
}

/// Host-side T=1 state machine
#[derive(Debug)]
pub struct T1Protocol {
    /// Host send-sequence bit, toggled per acknowledged I-block
    ns: u8,
    /// Next send-sequence bit expected from the card
    nr: u8,
    /// Maximum information field the card accepts
    ifsc: usize,
    edc: Edc,
    config: T1Config,
}

impl T1Protocol {
    /// Create a fresh protocol instance; `atr` selects the EDC
    pub fn new(atr: &[u8], config: T1Config) -> Self {
        Self {
            ns: 0,
            nr: 0,
            ifsc: IFSC_DEFAULT,
            edc: Edc::from_atr(atr),
            config,
        }
    }

    /// Announce the host's receive capacity to the card
    ///
    /// Readers that answer with anything but the matching S-response keep
    /// the default; that is not an error.
    pub fn negotiate_ifsd<D: UsbDeviceIo>(&mut self, xcvr: &mut CcidTransceiver<D>) {
        let request = encode_block(PCB_S_BITS | S_IFS, &[IFSD_ANNOUNCED], self.edc);
        match self.raw_exchange(xcvr, &request) {
            Ok(Block::S {
                kind: S_IFS,
                response: true,
                ..
            }) => debug!(ifsd = IFSD_ANNOUNCED, "IFSD negotiated"),
            Ok(_) | Err(_) => warn!("IFSD negotiation ignored by card"),
        }
    }

    /// Exchange one APDU, chaining as necessary
    pub fn transceive<D: UsbDeviceIo>(
        &mut self,
        xcvr: &mut CcidTransceiver<D>,
        apdu: &[u8],
    ) -> Result<Bytes> {
        debug_assert!(!apdu.is_empty(), "T=1 cannot carry an empty APDU");
        let chunks: Vec<&[u8]> = apdu.chunks(self.ifsc).collect();
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.iter().enumerate() {
            let more = i < last;
            let pcb = (self.ns << 6) | if more { 0x20 } else { 0x00 };
            let block = encode_block(pcb, chunk, self.edc);
            let reply = self.exchange_with_retry(xcvr, &block)?;
            self.ns ^= 1;

            match reply {
                Block::R { n, .. } if more => {
                    // card acknowledges and expects our next sequence bit
                    if n != self.ns {
                        return Err(Error::T1Protocol("R-block acknowledged wrong sequence"));
                    }
                }
                Block::I { .. } if more => {
                    return Err(Error::T1Protocol("card answered before chain completed"));
                }
                Block::I { n, more, inf } => {
                    return self.receive_chain(xcvr, n, more, inf);
                }
                Block::R { .. } => {
                    return Err(Error::T1Protocol("R-block after final chunk"));
                }
                Block::S { .. } => {
                    return Err(Error::T1Protocol("unexpected S-block"));
                }
            }
        }
        Err(Error::T1Protocol("empty APDU"))
    }

    /// Reassemble the card's I-block chain into a response APDU
    fn receive_chain<D: UsbDeviceIo>(
        &mut self,
        xcvr: &mut CcidTransceiver<D>,
        first_n: u8,
        mut more: bool,
        first_inf: Bytes,
    ) -> Result<Bytes> {
        if first_n != self.nr {
            return Err(Error::T1Protocol("unexpected card send-sequence"));
        }
        self.nr ^= 1;

        let mut acc = BytesMut::from(first_inf.as_ref());
        while more {
            let ack = encode_block(PCB_R_BITS | (self.nr << 4), &[], self.edc);
            match self.exchange_with_retry(xcvr, &ack)? {
                Block::I { n, more: m, inf } => {
                    if n != self.nr {
                        return Err(Error::T1Protocol("unexpected card send-sequence"));
                    }
                    self.nr ^= 1;
                    acc.put_slice(&inf);
                    more = m;
                }
                _ => return Err(Error::T1Protocol("expected I-block continuation")),
            }
        }
        Ok(acc.freeze())
    }

    /// Send a block and return the card's next meaningful block,
    /// transparently answering WTX/IFS requests and retransmitting on EDC
    /// failure or timeout.
    fn exchange_with_retry<D: UsbDeviceIo>(
        &mut self,
        xcvr: &mut CcidTransceiver<D>,
        block: &Bytes,
    ) -> Result<Block> {
        let deadline = Instant::now() + self.config.block_timeout;
        let mut attempts = 0;
        let mut outgoing = block.clone();

        loop {
            if Instant::now() >= deadline {
                return Err(Error::T1RetransmitExhausted);
            }
            match self.raw_exchange(xcvr, &outgoing) {
                Ok(Block::S {
                    kind: S_WTX,
                    response: false,
                    inf,
                }) => {
                    trace!(wtx = inf.first().copied().unwrap_or(1), "WTX requested");
                    outgoing = encode_block(PCB_S_BITS | PCB_S_RESPONSE | S_WTX, &inf, self.edc);
                }
                Ok(Block::S {
                    kind: S_IFS,
                    response: false,
                    inf,
                }) => {
                    let new_ifsc = inf.first().copied().unwrap_or(IFSC_DEFAULT as u8) as usize;
                    self.ifsc = new_ifsc.clamp(1, IFS_MAX);
                    debug!(ifsc = self.ifsc, "card raised IFSC");
                    outgoing = encode_block(PCB_S_BITS | PCB_S_RESPONSE | S_IFS, &inf, self.edc);
                }
                Ok(Block::S {
                    kind: S_ABORT,
                    response: false,
                    ..
                }) => return Err(Error::T1Protocol("card aborted the chain")),
                Ok(Block::S {
                    kind: S_RESYNCH, ..
                }) => return Err(Error::T1Protocol("unsolicited resynch")),
                Ok(Block::R { n, error }) if error != 0 => {
                    // card saw a broken block; send the same one again
                    trace!(n, error, "card requested retransmission");
                    attempts += 1;
                    if attempts > MAX_RETRANSMITS {
                        return Err(Error::T1RetransmitExhausted);
                    }
                    outgoing = block.clone();
                }
                Ok(other) => return Ok(other),
                Err(Error::T1BadEdc) | Err(Error::TransportTimeout) => {
                    attempts += 1;
                    if attempts > MAX_RETRANSMITS {
                        return Err(Error::T1RetransmitExhausted);
                    }
                    outgoing = block.clone();
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn raw_exchange<D: UsbDeviceIo>(
        &self,
        xcvr: &mut CcidTransceiver<D>,
        block: &Bytes,
    ) -> Result<Block> {
        let reply = xcvr.xfr_block(block, level::SINGLE)?;
        decode_block(&reply.data, self.edc)
    }
}

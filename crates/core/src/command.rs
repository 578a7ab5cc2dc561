//! Command APDU construction and serialisation
//!
//! Commands are built with a fluent API and serialised to the ISO/IEC
//! 7816-4 short or extended form. The form is chosen automatically: short
//! when the payload fits 255 bytes and at most 256 response bytes are
//! expected, extended otherwise.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;

/// Maximum payload length of a command APDU
pub const MAX_DATA_LEN: usize = 65535;

/// The `ne` value meaning "as much response data as the card can return"
pub const NE_MAX: u32 = 65536;

/// CLA bit indicating a non-final chunk of a chained command
pub const CLA_CHAINING: u8 = 0x10;

/// Generic command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command payload (empty means no data field)
    pub data: Bytes,
    /// Expected response length: 0 = none, [`NE_MAX`] = maximum
    pub ne: u32,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            ne: 0,
        }
    }

    /// Set the payload data
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        assert!(
            data.len() <= MAX_DATA_LEN,
            "APDU payload must not exceed {} bytes",
            MAX_DATA_LEN
        );
        self.data = data;
        self
    }

    /// Set the expected response length
    pub fn with_ne(mut self, ne: u32) -> Self {
        assert!(ne <= NE_MAX, "ne must not exceed {}", NE_MAX);
        self.ne = ne;
        self
    }

    /// Set the chaining bit, marking this as a non-final chunk
    pub const fn with_chaining(mut self) -> Self {
        self.cla |= CLA_CHAINING;
        self
    }

    /// Whether the chaining bit is set
    pub const fn is_chained(&self) -> bool {
        self.cla & CLA_CHAINING != 0
    }

    /// Whether this command serialises to the extended form
    pub fn is_extended(&self) -> bool {
        self.data.len() > 255 || self.ne > 256
    }

    /// Parse a command APDU, accepting both short and extended forms
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 4 {
            return Err(Error::ApduMalformed("command shorter than header"));
        }
        let mut command = Self::new(raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];
        if body.is_empty() {
            return Ok(command);
        }

        // extended form is flagged by a zero byte where short Lc/Le
        // would sit, followed by at least two more bytes
        if body[0] == 0x00 && body.len() > 2 {
            let word = ((body[1] as u32) << 8) | body[2] as u32;
            let rest = &body[3..];
            if rest.is_empty() {
                // case 2E: extended Le only
                command.ne = if word == 0 { NE_MAX } else { word };
                return Ok(command);
            }
            let lc = word as usize;
            if rest.len() < lc {
                return Err(Error::ApduMalformed("extended Lc exceeds input"));
            }
            command.data = Bytes::copy_from_slice(&rest[..lc]);
            match rest.len() - lc {
                0 => Ok(command),
                2 => {
                    let le = ((rest[lc] as u32) << 8) | rest[lc + 1] as u32;
                    command.ne = if le == 0 { NE_MAX } else { le };
                    Ok(command)
                }
                _ => Err(Error::ApduMalformed("trailing bytes after extended Le")),
            }
        } else {
            if body.len() == 1 {
                // case 2: short Le only
                command.ne = if body[0] == 0 { 256 } else { body[0] as u32 };
                return Ok(command);
            }
            let lc = body[0] as usize;
            let rest = &body[1..];
            if rest.len() < lc {
                return Err(Error::ApduMalformed("Lc exceeds input"));
            }
            command.data = Bytes::copy_from_slice(&rest[..lc]);
            match rest.len() - lc {
                0 => Ok(command),
                1 => {
                    let le = rest[lc];
                    command.ne = if le == 0 { 256 } else { le as u32 };
                    Ok(command)
                }
                _ => Err(Error::ApduMalformed("trailing bytes after Le")),
            }
        }
    }

    /// Serialise to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 3 + self.data.len() + 3);
        buf.put_u8(self.cla);
        buf.put_u8(self.ins);
        buf.put_u8(self.p1);
        buf.put_u8(self.p2);

        if self.is_extended() {
            if !self.data.is_empty() {
                buf.put_u8(0x00);
                buf.put_u16(self.data.len() as u16);
                buf.put_slice(&self.data);
                if self.ne > 0 {
                    // Le follows Lc without a second leading zero
                    buf.put_u16(le_extended(self.ne));
                }
            } else if self.ne > 0 {
                buf.put_u8(0x00);
                buf.put_u16(le_extended(self.ne));
            }
        } else {
            if !self.data.is_empty() {
                buf.put_u8(self.data.len() as u8);
                buf.put_slice(&self.data);
            }
            if self.ne > 0 {
                buf.put_u8(le_short(self.ne));
            }
        }

        buf.freeze()
    }
}

/// Short-form Le byte: 256 encodes as 0x00
const fn le_short(ne: u32) -> u8 {
    if ne == 256 { 0x00 } else { ne as u8 }
}

/// Extended-form Le word: 65536 encodes as 0x0000
const fn le_extended(ne: u32) -> u16 {
    if ne == NE_MAX { 0x0000 } else { ne as u16 }
}

//! Response APDU parsing and status-word interpretation

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;

/// Status word (SW1-SW2) of a response APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte
    pub sw1: u8,
    /// Second status byte
    pub sw2: u8,
}

impl StatusWord {
    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    /// Security status not satisfied (69 82)
    pub const SECURITY_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    /// Authentication method blocked (69 83)
    pub const AUTH_METHOD_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);
    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);
    /// Incorrect parameters in the data field (6A 80)
    pub const WRONG_DATA: StatusWord = StatusWord::new(0x6A, 0x80);
    /// File or application not found (6A 82)
    pub const NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    /// Referenced data not found (6A 88)
    pub const REF_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Whether this status word is 90 00
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Number of response bytes still available (SW1 = 61), 0x00 meaning
    /// at least 256
    pub const fn more_data_available(&self) -> Option<u8> {
        if self.sw1 == 0x61 { Some(self.sw2) } else { None }
    }

    /// Corrected Le value when the card rejected the Le field (SW1 = 6C)
    pub const fn corrected_le(&self) -> Option<u8> {
        if self.sw1 == 0x6C { Some(self.sw2) } else { None }
    }

    /// Remaining PIN retries when the card reported 63 Cx
    pub const fn pin_retries(&self) -> Option<u8> {
        if self.sw1 == 0x63 && self.sw2 & 0xF0 == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Generic response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Create a new response from payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Create a success response (SW = 90 00)
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, StatusWord::SUCCESS)
    }

    /// Create a payload-less response carrying only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse a raw response (payload followed by SW1 SW2)
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 2 {
            return Err(Error::ApduMalformed("response shorter than status word"));
        }
        let (payload, sw) = data.split_at(data.len() - 2);
        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }

    /// Response payload without the status word
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the response, returning the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Whether the status word is 90 00
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        let mut buf = BytesMut::with_capacity(response.payload.len() + 2);
        buf.put_slice(&response.payload);
        buf.put_u8(response.status.sw1);
        buf.put_u8(response.status.sw2);
        buf.freeze()
    }
}

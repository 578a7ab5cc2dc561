//! Unified error taxonomy for transport and codec operations
//!
//! Applet-level status-word errors live in `keyfob-openpgp`; this module
//! covers everything below the applet: transports, CCID, T=1, U2F HID and
//! the APDU/TLV codecs.

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = core::result::Result<T, Error>;

/// U2F HID ERROR response codes (frame command 0xBF, first payload byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum U2fHidErrorCode {
    /// The command in the request is invalid (0x01)
    InvalidCmd,
    /// The parameters in the request are invalid (0x02)
    InvalidPar,
    /// The length field (BCNT) is invalid (0x03)
    InvalidLen,
    /// The sequence number does not match the expected value (0x04)
    InvalidSeq,
    /// The message has timed out (0x05)
    MessageTimeout,
    /// Command requires channel lock (0x0A)
    LockRequired,
    /// The channel identifier is not valid (0x0B)
    InvalidChannel,
    /// Unspecified or vendor-defined error
    Other(u8),
}

impl From<u8> for U2fHidErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::InvalidCmd,
            0x02 => Self::InvalidPar,
            0x03 => Self::InvalidLen,
            0x04 => Self::InvalidSeq,
            0x05 => Self::MessageTimeout,
            0x0A => Self::LockRequired,
            0x0B => Self::InvalidChannel,
            other => Self::Other(other),
        }
    }
}

/// The main error type for transport and codec operations
#[derive(Debug, Error)]
pub enum Error {
    /// The transport has been released; no further operations are possible
    #[error("Transport has been released")]
    TransportReleased,

    /// A transaction is already in flight on this transport
    #[error("Transport is busy with another transaction")]
    TransportBusy,

    /// The transport deadline elapsed
    #[error("Transport operation timed out")]
    TransportTimeout,

    /// Link-layer I/O failure
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// The CCID reader returned a structurally invalid message
    #[error("Malformed CCID response: {0}")]
    CcidBadResponse(&'static str),

    /// The CCID reader echoed an unexpected sequence number
    #[error("CCID sequence mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CcidSeqMismatch {
        /// Sequence number the host sent
        expected: u8,
        /// Sequence number the reader echoed
        actual: u8,
    },

    /// The CCID reader reported a hardware error slot status
    #[error("CCID hardware error, bError = {code:#04x}")]
    CcidHwError {
        /// The `bError` byte from the slot status
        code: u8,
    },

    /// T=1 block could not be parsed
    #[error("T=1 framing error: {0}")]
    T1Framing(&'static str),

    /// T=1 epilogue check failed
    #[error("T=1 EDC check failed")]
    T1BadEdc,

    /// T=1 retransmission limit reached
    #[error("T=1 retransmit limit exhausted")]
    T1RetransmitExhausted,

    /// T=1 peer violated the block protocol
    #[error("T=1 protocol violation: {0}")]
    T1Protocol(&'static str),

    /// The U2F HID device returned an ERROR frame
    #[error("U2F HID device error: {code:?}")]
    U2fHidError {
        /// Decoded error byte of the ERROR frame
        code: U2fHidErrorCode,
    },

    /// The U2F HID channel is busy (ERR_CHANNEL_BUSY)
    #[error("U2F HID channel busy")]
    U2fHidChannelBusy,

    /// CMD_INIT handshake failed (nonce mismatch or short response)
    #[error("U2F HID INIT failed: {0}")]
    U2fHidBadInit(&'static str),

    /// An APDU could not be encoded or decoded
    #[error("Malformed APDU: {0}")]
    ApduMalformed(&'static str),

    /// TLV input ended before tag, length or value was complete
    #[error("Truncated TLV input")]
    TlvTruncated,

    /// TLV length field is not a supported encoding
    #[error("Invalid TLV length encoding")]
    TlvBadLength,

    /// TLV tag is longer than the two bytes this stack supports
    #[error("TLV tag too long")]
    TlvTagTooLong,

    /// Context wrapper carrying the failing operation
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// Underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers and return the root error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    /// Add context to the error, if any
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

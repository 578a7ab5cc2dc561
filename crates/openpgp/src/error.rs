//! Error type for OpenPGP card operations
//!
//! Recognised status words map to named variants; everything else falls
//! back to [`Error::ApduStatus`]. Transport and codec failures pass
//! through transparently from `keyfob-core`.

use keyfob_core::StatusWord;
use thiserror::Error;

/// Result type for OpenPGP card operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for OpenPGP card operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or codec failure
    #[error(transparent)]
    Core(#[from] keyfob_core::Error),

    /// SELECT failed; no OpenPGP applet on this card (6A 82)
    #[error("OpenPGP applet not present on card")]
    AppletNotPresent,

    /// Wrong PIN; the card counts down remaining attempts (63 Cx)
    #[error("PIN incorrect, {retries} retries left")]
    PinIncorrect {
        /// Remaining verification attempts
        retries: u8,
    },

    /// The PIN's retry counter is exhausted (69 83)
    #[error("PIN blocked")]
    PinBlocked,

    /// Command needs a prior VERIFY (69 82)
    #[error("Security status not satisfied")]
    SecurityNotSatisfied,

    /// Conditions of use not satisfied (69 85)
    #[error("Conditions of use not satisfied")]
    ConditionsNotSatisfied,

    /// The card rejected the data field (6A 80)
    #[error("Incorrect data field")]
    WrongData,

    /// Referenced data not found (6A 88)
    #[error("Referenced data not found")]
    RefNotFound,

    /// Unmapped status word
    #[error("Card returned status {sw:04X}")]
    ApduStatus {
        /// Raw SW1SW2
        sw: u16,
    },

    /// Algorithm attributes describe a key this stack cannot handle
    #[error("Unsupported key format: {0}")]
    UnsupportedKeyFormat(&'static str),

    /// The card refused the key import
    #[error("Key import rejected with status {sw:04X}")]
    KeyImportRejected {
        /// Raw SW1SW2
        sw: u16,
    },

    /// The application related data could not be parsed
    #[error("Capability parse failed: {0}")]
    CapabilityParse(&'static str),

    /// Host-side RSA key generation failed
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    /// The pairing flow failed; card state is undefined
    #[error("Pairing aborted: {cause}")]
    PairingAborted {
        /// The failure that aborted the flow
        cause: Box<Error>,
    },
}

impl Error {
    /// Map a non-success status word to the taxonomy
    pub fn from_status(sw: StatusWord) -> Self {
        if let Some(retries) = sw.pin_retries() {
            return Self::PinIncorrect { retries };
        }
        match sw.to_u16() {
            0x6983 => Self::PinBlocked,
            0x6982 => Self::SecurityNotSatisfied,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6A80 => Self::WrongData,
            0x6A82 => Self::AppletNotPresent,
            0x6A88 => Self::RefNotFound,
            other => Self::ApduStatus { sw: other },
        }
    }

    /// The raw status word, if this error carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AppletNotPresent => Some(0x6A82),
            Self::PinBlocked => Some(0x6983),
            Self::SecurityNotSatisfied => Some(0x6982),
            Self::ConditionsNotSatisfied => Some(0x6985),
            Self::WrongData => Some(0x6A80),
            Self::RefNotFound => Some(0x6A88),
            Self::ApduStatus { sw } | Self::KeyImportRejected { sw } => Some(*sw),
            _ => None,
        }
    }
}

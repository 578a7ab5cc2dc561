//! Core building blocks for the keyfob security-key stack
//!
//! This crate carries the pieces every transport and applet layer shares:
//! the ISO/IEC 7816-4 APDU codec, the BER-TLV codec, the [`CardTransport`]
//! abstraction, zeroising byte-secrets and the error taxonomy. It performs
//! no I/O of its own; concrete transports live in the
//! `keyfob-transport-*` crates.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod clock;
pub mod command;
mod error;
pub mod response;
pub mod secret;
pub mod tlv;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use command::Command;
pub use error::{Error, Result, ResultExt, U2fHidErrorCode};
pub use response::{Response, StatusWord};
pub use secret::{ByteSecret, PinProvider, StaticPinProvider};
pub use tlv::Tlv;
pub use transport::{CardTransport, MockTransport, SharedTransport, TransportKind};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, ByteSecret, CardTransport, Clock, Command, Error, PinProvider, Response,
        Result, ResultExt, SharedTransport, StatusWord, SystemClock, Tlv, TransportKind,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.cla, 0x00);
        assert_eq!(cmd.ins, 0xA4);

        let rsp = Response::success(Bytes::from_static(&[0x01]));
        assert!(rsp.is_success());
        assert_eq!(rsp.status(), StatusWord::new(0x90, 0x00));
    }
}

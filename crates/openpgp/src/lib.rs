//! Driver for the OpenPGP card application (v2.x / v3.x)
//!
//! Built on any [`keyfob_core::CardTransport`]: SELECT and capability
//! discovery, APDU chaining in both directions, the PIN state machine
//! with a zeroised cache, RSA key import with host-side fingerprint
//! computation, data-object access, factory reset and the pairing flow.
//!
//! The entry point is [`OpenPgpCard::open`]; lower-level access goes
//! through [`OpenPgpConnection`].
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod capabilities;
pub mod card;
pub mod connection;
pub mod constants;
mod error;
pub mod fingerprint;
pub mod key_format;
pub mod ops;
pub mod paired_key;
pub mod public_key;
pub mod rsa_util;

pub use capabilities::{CardFeatures, OpenPgpCapabilities};
pub use card::OpenPgpCard;
pub use connection::{OpenPgpConnection, PinSlot};
pub use error::{Error, Result};
pub use key_format::{KeyFormat, KeyType, RsaImportFormat};
pub use paired_key::PairedKey;
pub use public_key::PublicKeyMaterial;
pub use rsa_util::{RsaKeyComponents, generate_rsa_2048};

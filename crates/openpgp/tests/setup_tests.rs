//! End-to-end pairing flow against the simulated applet. Key generation
//! is real RSA-2048, so these tests are the slow ones.

mod common;

use common::{DEFAULT_PW3, SimCard};
use keyfob_core::ByteSecret;
use keyfob_openpgp::fingerprint::rsa_fingerprint;
use keyfob_openpgp::{Error, KeyType, OpenPgpCard, PublicKeyMaterial};

#[test]
fn setup_paired_encryption_only() {
    let mut card = OpenPgpCard::open(SimCard::new()).unwrap();
    assert!(card.is_empty());

    let new_pin = ByteSecret::from_bytes(b"482913");
    let new_admin = ByteSecret::from_bytes(b"91827364");
    let paired = card
        .setup_paired_at(&new_pin, &new_admin, true, 0x5E00_0000)
        .unwrap();

    // the card now reports the key the host imported
    let caps = card.capabilities();
    assert!(caps.has_encrypt_key());
    assert_eq!(
        caps.fingerprint(KeyType::Encrypt),
        Some(&paired.encrypt_fingerprint)
    );
    assert!(paired.sign_fingerprint.is_none());
    assert!(paired.auth_fingerprint.is_none());
    assert!(card.matches_paired_key(&paired));

    // fingerprint is reproducible from the paired public key
    let PublicKeyMaterial::Rsa { modulus, exponent } = &paired.encrypt_public_key else {
        panic!("expected RSA material");
    };
    assert_eq!(
        rsa_fingerprint(0x5E00_0000, modulus, exponent),
        paired.encrypt_fingerprint
    );

    // the card hands the same public key back
    match card.retrieve_public_key(KeyType::Encrypt).unwrap() {
        PublicKeyMaterial::Rsa {
            modulus: m,
            exponent: e,
        } => {
            assert_eq!(&m, modulus);
            assert_eq!(&e, exponent);
        }
        other => panic!("unexpected material {:?}", other),
    }

    // default PINs no longer verify
    let default_admin = ByteSecret::from_bytes(DEFAULT_PW3);
    assert!(matches!(
        card.connection().verify_admin_pin(&default_admin),
        Err(Error::PinIncorrect { .. })
    ));
    card.connection().clear_pin_cache();
    assert!(card.connection().verify_admin_pin(&new_admin).is_ok());
}

#[test]
fn setup_paired_wipes_configured_card() {
    let mut sim = SimCard::new();
    sim.set_fingerprint(1, [0xAB; 20]);
    let mut card = OpenPgpCard::open(sim).unwrap();
    assert!(!card.is_empty());

    let new_pin = ByteSecret::from_bytes(b"123321");
    let new_admin = ByteSecret::from_bytes(b"44556677");
    let paired = card
        .setup_paired_at(&new_pin, &new_admin, true, 0x5E00_0001)
        .unwrap();

    // the pre-existing fingerprint is gone, replaced by the new key's
    assert_ne!(paired.encrypt_fingerprint, [0xAB; 20]);
    assert!(card.matches_paired_key(&paired));
}

#[test]
fn retrieve_public_key_without_key_fails() {
    let mut card = OpenPgpCard::open(SimCard::new()).unwrap();
    assert!(matches!(
        card.retrieve_public_key(KeyType::Auth),
        Err(Error::RefNotFound)
    ));
}

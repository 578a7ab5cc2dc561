//! PIN modification flows
//!
//! CHANGE REFERENCE DATA wants the old and new PIN concatenated in one
//! data field; RESET RETRY COUNTER sets a fresh PW1 under admin
//! authentication.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use keyfob_core::{ByteSecret, CardTransport, Command};

use crate::connection::OpenPgpConnection;
use crate::constants::{ins, pw};
use crate::error::Result;

/// PIN modification operation
#[derive(Debug)]
pub struct ModifyPinOp<'a, T: CardTransport> {
    connection: &'a mut OpenPgpConnection<T>,
}

impl<'a, T: CardTransport> ModifyPinOp<'a, T> {
    /// Borrow the connection for PIN changes
    pub fn new(connection: &'a mut OpenPgpConnection<T>) -> Self {
        Self { connection }
    }

    /// CHANGE REFERENCE DATA for PW1
    pub fn change_pw1(&mut self, old: &ByteSecret, new: &ByteSecret) -> Result<()> {
        self.change_reference_data(pw::PW1_SIGN, old, new)
    }

    /// CHANGE REFERENCE DATA for PW3
    pub fn change_pw3(&mut self, old: &ByteSecret, new: &ByteSecret) -> Result<()> {
        self.change_reference_data(pw::PW3, old, new)
    }

    /// RESET RETRY COUNTER: unblock PW1 and set it to `new_pw1`
    ///
    /// Requires prior PW3 verification.
    pub fn reset_pw1(&mut self, new_pw1: &ByteSecret) -> Result<()> {
        let command = Command::new(0x00, ins::RESET_RETRY_COUNTER, 0x02, pw::PW1_SIGN)
            .with_data(new_pw1.reveal().to_vec());
        let result = self.connection.communicate(&command);
        self.connection.clear_pin_cache();
        result.map(|_| ())
    }

    /// Replace both PINs in one authenticated flow: verify the current
    /// PW3, set PW1 through RESET RETRY COUNTER, then change PW3.
    pub fn modify_pw1_and_pw3(
        &mut self,
        current_pw3: &ByteSecret,
        new_pw1: &ByteSecret,
        new_pw3: &ByteSecret,
    ) -> Result<()> {
        self.connection.verify_admin_pin(current_pw3)?;
        self.reset_pw1(new_pw1)?;
        self.change_pw3(current_pw3, new_pw3)?;
        debug!("PW1 and PW3 replaced");
        Ok(())
    }

    fn change_reference_data(
        &mut self,
        reference: u8,
        old: &ByteSecret,
        new: &ByteSecret,
    ) -> Result<()> {
        let mut concatenated = BytesMut::with_capacity(old.len() + new.len());
        concatenated.put_slice(old.reveal());
        concatenated.put_slice(new.reveal());
        let command = Command::new(0x00, ins::CHANGE_REFERENCE_DATA, 0x00, reference)
            .with_data(concatenated.freeze());

        let result = self.connection.communicate(&command);
        // the old PIN is gone either way; a stale cache would loop on 6982
        self.connection.clear_pin_cache();
        result.map(|_| ())
    }
}

//! Factory reset
//!
//! TERMINATE DF erases the applet's state, ACTIVATE FILE re-initialises
//! it with default PINs and no keys. Applets that refuse TERMINATE while
//! unauthenticated accept it once both retry counters are exhausted, so
//! the fallback deliberately burns them down with a wrong PIN.

use tracing::{debug, warn};

use keyfob_core::{ByteSecret, CardTransport};

use crate::connection::{OpenPgpConnection, PinSlot};
use crate::error::{Error, Result};

/// A PIN no card accepts; long enough for every allowed PW length
const INVALID_PIN: &[u8] = &[0x40; 8];

/// Maximum verify attempts per PIN while burning down retry counters
const MAX_BLOCK_ATTEMPTS: usize = 12;

/// Factory reset operation
#[derive(Debug)]
pub struct ResetAndWipeOp<'a, T: CardTransport> {
    connection: &'a mut OpenPgpConnection<T>,
}

impl<'a, T: CardTransport> ResetAndWipeOp<'a, T> {
    /// Borrow the connection for a reset
    pub fn new(connection: &'a mut OpenPgpConnection<T>) -> Self {
        Self { connection }
    }

    /// Terminate and re-activate the applet, erasing all keys and
    /// restoring default PINs and retry counters.
    pub fn reset_and_wipe(&mut self) -> Result<()> {
        self.connection.clear_pin_cache();

        match self.connection.terminate_df() {
            Ok(()) => {}
            Err(Error::SecurityNotSatisfied) | Err(Error::ConditionsNotSatisfied) => {
                debug!("TERMINATE refused, blocking retry counters first");
                self.block_pin(PinSlot::Pw1Sign)?;
                self.block_pin(PinSlot::Pw3)?;
                self.connection.terminate_df()?;
            }
            Err(other) => return Err(other),
        }

        self.connection.activate_file()?;
        self.connection.refresh_capabilities()?;
        debug!("card wiped and re-activated");
        Ok(())
    }

    fn block_pin(&mut self, slot: PinSlot) -> Result<()> {
        let wrong = ByteSecret::from_bytes(INVALID_PIN);
        for _ in 0..MAX_BLOCK_ATTEMPTS {
            match self.connection.verify_pin(slot, &wrong) {
                Err(Error::PinIncorrect { .. }) => continue,
                Err(Error::PinBlocked) => return Ok(()),
                // some applets drop into the blocked state silently
                Err(Error::SecurityNotSatisfied) => return Ok(()),
                Err(other) => return Err(other),
                Ok(()) => {
                    warn!(?slot, "invalid PIN unexpectedly verified");
                    return Err(Error::ConditionsNotSatisfied);
                }
            }
        }
        Err(Error::ConditionsNotSatisfied)
    }
}

//! Administrative operations on the applet
//!
//! Each operation borrows the connection for its duration; all of them
//! require prior PW3 verification unless noted otherwise.

mod change_key_rsa;
mod modify_pin;
mod reset_wipe;

pub use change_key_rsa::ChangeKeyRsaOp;
pub use modify_pin::ModifyPinOp;
pub use reset_wipe::ResetAndWipeOp;

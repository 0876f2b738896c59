//! Client key derivations used during the authentication exchange.
//!
//! CK1 is derived from the user's password, CK3 from a prior CK2 (which is
//! already a base64 digest). "Encrypt" here means a salted SHA-512 digest;
//! that is what the protocol calls it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha512};

/// Derive ClientKey1 from the password and session parameters.
pub fn ck1(password: &str, session_id: u16, time_secs: u32, time_millis: u32) -> String {
    let salt = salt(session_id, time_secs, time_millis);
    salted_digest(&password_digest(password), &salt)
}

/// Derive ClientKey3 from a prior key and session parameters.
///
/// Unlike [`ck1`] there is no inner hash: the password is expected to
/// already be a base64 digest (CK2).
pub fn ck3(password: &str, session_id: u16, time_secs: u32, time_millis: u32) -> String {
    let salt = salt(session_id, time_secs, time_millis);
    salted_digest(password, &salt)
}

fn salt(session_id: u16, time_secs: u32, time_millis: u32) -> String {
    format!("{session_id}{time_secs}{time_millis}")
}

fn salted_digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn password_digest(password: &str) -> String {
    STANDARD.encode(Sha512::digest(password.as_bytes()))
}

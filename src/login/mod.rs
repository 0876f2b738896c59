//! Login crypto - session-scoped key derivation and auth token handling.
//!
//! During authentication the client derives a Twofish key and IV from the
//! parameters agreed in the session handshake, encrypts an auth token with
//! Twofish in OFB mode ([`encrypt_rec1`]), and proves knowledge of the
//! password through the [`ck1`]/[`ck3`] hash derivations.

mod ck;
mod rec1;

pub use ck::{ck1, ck3};
pub use rec1::{auth_token, decrypt_rec1, encrypt_rec1, generate_iv, generate_key};

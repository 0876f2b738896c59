//! Session-key derivation and the Twofish-OFB auth token cipher.

use cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use twofish::Twofish;

type TwofishOfb = Ofb<Twofish>;

const KEY_CONSTANT: u8 = 0x17;
const IV_CONSTANT: u8 = 0xB6;

/// Derive the 32-byte Twofish key from the session parameters.
///
/// The key starts as an ascending counter seeded with `0x17`, then selected
/// bytes are overwritten with a little-endian shuffle of the session id and
/// timestamps.
pub fn generate_key(session_id: u16, time_secs: u32, time_millis: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = KEY_CONSTANT + i as u8;
    }

    let mut scratch = [0u8; 4];

    scratch[..2].copy_from_slice(&session_id.to_le_bytes());
    key[4] = scratch[0];
    key[5] = scratch[2]; // always zero
    key[6] = scratch[1];

    scratch.copy_from_slice(&time_secs.to_le_bytes());
    key[8] = scratch[0];
    key[9] = scratch[2];
    key[12] = scratch[1];
    key[13] = scratch[3];

    scratch.copy_from_slice(&time_millis.to_le_bytes());
    key[14] = scratch[0];
    key[15] = scratch[1];

    key
}

/// Derive the 16-byte IV: a descending counter seeded with `0xB6`.
pub fn generate_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    for (i, byte) in iv.iter_mut().enumerate() {
        *byte = IV_CONSTANT - i as u8;
    }
    iv
}

fn keystream_xor(data: &[u8], session_id: u16, time_secs: u32, time_millis: u32) -> Vec<u8> {
    let key = generate_key(session_id, time_secs, time_millis);
    let iv = generate_iv();

    let mut cipher = TwofishOfb::new(&key.into(), &iv.into());
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

/// Encrypt a plaintext with a key derived from the mutually agreed session
/// parameters.
pub fn encrypt_rec1(plaintext: &[u8], session_id: u16, time_secs: u32, time_millis: u32) -> Vec<u8> {
    keystream_xor(plaintext, session_id, time_secs, time_millis)
}

/// Decrypt a ciphertext with a key derived from the mutually agreed session
/// parameters. OFB is symmetric, so this is the same keystream XOR as
/// [`encrypt_rec1`].
pub fn decrypt_rec1(rec1: &[u8], session_id: u16, time_secs: u32, time_millis: u32) -> Vec<u8> {
    keystream_xor(rec1, session_id, time_secs, time_millis)
}

/// Build the token encrypted by the client in the authentication stage.
pub fn auth_token(username: &str, ck1: &str, session_id: u16) -> Vec<u8> {
    format!("{session_id} {username} {ck1}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    const CK1: &str =
        "+FO9W7DLYNuvLdwvnMaxtJrSD+/h7HHfpzSNKv6G4UomKKoy+uwknGbqrtz4KNHSIS6McowtSTXtQBwwq7bwSQ==";
    const REC1: &str =
        "VLZpUqHY04cULJ+dvYknBM2Y3xynINN3gB4svovYA0jzWUsVAXjdtz363K9pC049fhpK9zFjlGaC6awzXmUCeKMseu7+Bol3JiFmN46MAv6fOQ7pNvD6RFlpzzjZ8rQ=";

    #[test]
    fn test_generate_iv() {
        assert_eq!(hex::encode(generate_iv()), "b6b5b4b3b2b1b0afaeadacabaaa9a8a7");
    }

    #[test]
    fn test_generate_key() {
        let key = generate_key(3258, 1617815695, 805);
        assert_eq!(
            hex::encode(key),
            "1718191aba000c1e8f6d2122e86025032728292a2b2c2d2e2f30313233343536"
        );
    }

    #[test]
    fn test_auth_token_format() {
        let token = auth_token("1", CK1, 3258);
        assert_eq!(token, format!("3258 1 {CK1}").into_bytes());
    }

    #[test]
    fn test_encrypt_rec1() {
        let token = auth_token("1", CK1, 3258);
        let rec1 = encrypt_rec1(&token, 3258, 1617815695, 805);
        assert_eq!(STANDARD.encode(rec1), REC1);
    }

    #[test]
    fn test_decrypt_rec1() {
        let rec1 = STANDARD.decode(REC1).unwrap();
        let plaintext = decrypt_rec1(&rec1, 3258, 1617815695, 805);
        assert_eq!(String::from_utf8(plaintext).unwrap(), format!("3258 1 {CK1}"));
    }

    #[test]
    fn test_encrypt_decrypt_inverse() {
        let plaintext = b"arbitrary bytes \x00\x01\x02";
        let rec1 = encrypt_rec1(plaintext, 42, 7, 9);
        assert_ne!(&rec1[..], &plaintext[..]);
        assert_eq!(decrypt_rec1(&rec1, 42, 7, 9), plaintext);
    }
}

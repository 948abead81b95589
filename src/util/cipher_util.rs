use actix_web::cookie::Key;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

pub fn get_salt<const N: usize>() -> [u8; N] {
    let mut salt = [0u8; N];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn gen_cookie_key(cookie_token: &str) -> Key {
    let mut hasher = Sha512::new();
    hasher.update(cookie_token);
    Key::from(hasher.finalize().as_slice())
}

// Sessions signed with this key die with the process.
pub fn gen_ephemeral_cookie_key() -> Key {
    gen_cookie_key(&hex::encode(get_salt::<64>()))
}

pub fn digest(content: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// Compares in time independent of where the first mismatch is.
pub fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn check_token(expected: &str, provided: &str) -> bool {
    digests_match(&digest(expected), &digest(provided))
}

//! Opaque identifier generation: random tokens rendered as lowercase hex.

use rand::RngCore;

/// Generate a random token of `bytes` bytes of entropy, lowercase hex encoded.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

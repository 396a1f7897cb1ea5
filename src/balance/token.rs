//! Request signing for the balance APIs.

use md5::{Digest, Md5};

/// Derive the request token: `md5(md5(password) + transaction_id + username + number)`.
///
/// Both digests are lowercase hex. The scheme is fixed by the remote APIs.
pub fn sign(transaction_id: &str, number: &str, username: &str, password: &str) -> String {
    let password_digest = md5_hex(password.as_bytes());

    let mut hasher = Md5::new();
    hasher.update(password_digest.as_bytes());
    hasher.update(transaction_id.as_bytes());
    hasher.update(username.as_bytes());
    hasher.update(number.as_bytes());
    hex::encode(hasher.finalize())
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

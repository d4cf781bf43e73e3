//! Credential generation.

use rand::Rng;

/// Default generated password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 12;

/// Default charset: ASCII letters and digits.
pub const ALPHANUMERIC: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a password drawn uniformly from `charset`.
///
/// `rand::rng()` is an OS-seeded cryptographically secure generator, so
/// the output is suitable for credentials. Pure function of its inputs
/// and the entropy source.
///
/// # Panics
///
/// Panics if `charset` is empty.
pub fn generate_password(length: usize, charset: &[u8]) -> String {
    assert!(!charset.is_empty(), "charset must not be empty");
    let mut rng = rand::rng();
    (0..length)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

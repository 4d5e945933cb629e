//! Identifier and secret generation.
//!
//! All randomness comes from the OS generator. Codes and OTPs are short
//! because a human relays them between devices; credentials and ids carry
//! the full entropy of their byte length.

use getrandom::getrandom;

use crate::types::now_ms;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Display code length for a pairing session.
pub const CODE_LEN: usize = 6;
/// OTP digit count.
pub const OTP_LEN: usize = 6;

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut b = [0u8; N];
    getrandom(&mut b).expect("rng");
    b
}

fn from_charset(charset: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut buf = vec![0u8; len];
    getrandom(&mut buf).expect("rng");
    for b in buf {
        out.push(charset[b as usize % charset.len()] as char);
    }
    out
}

/// Generate a stable Host identifier, `host-` plus 16 hex chars.
pub fn generate_host_id() -> String {
    format!("host-{}", hex::encode(rand_bytes::<8>()))
}

/// Generate a pairing session identifier.
pub fn generate_session_id() -> String {
    format!("sess-{}", hex::encode(rand_bytes::<8>()))
}

/// Generate a correlation id: prefix, current Unix millis, and a random
/// suffix. Timestamp plus entropy keeps ids unique across client restarts
/// within the store's retention window.
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}-{}-{}", prefix, now_ms(), from_charset(SUFFIX_CHARSET, 6))
}

/// Generate a human-shareable session display code.
pub fn generate_session_code() -> String {
    from_charset(CODE_CHARSET, CODE_LEN)
}

/// Generate a numeric one-time password.
pub fn generate_otp() -> String {
    let buf = rand_bytes::<OTP_LEN>();
    buf.iter().map(|b| char::from(b'0' + b % 10)).collect()
}

/// Generate an opaque bearer credential, 64 hex chars.
pub fn generate_credential() -> String {
    hex::encode(rand_bytes::<32>())
}

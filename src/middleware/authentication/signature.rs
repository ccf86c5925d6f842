use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Clock tolerance for the signed timestamp, seconds either way.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 120;

/// Canonical signed material: caller, timestamp and nonce bind the request
/// to one principal and one moment; method and path stop a signed body from
/// being replayed against another endpoint.
pub fn compute_signature(
    secret: &str,
    caller: &str,
    timestamp: i64,
    nonce: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{caller}.{timestamp}.{nonce}.{method}.{path}.").as_bytes());
    mac.update(body);
    format!("{:x}", mac.finalize().into_bytes())
}

pub fn timestamp_in_window(timestamp: i64, now: i64) -> bool {
    (now - timestamp).abs() <= TIMESTAMP_TOLERANCE_SECS
}

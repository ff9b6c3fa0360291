//! Token expiry inspection.
//!
//! The platform issues JWTs whose `exp` claim drives the silent-renewal
//! policy. The claim is read without signature verification: it is only a
//! scheduling hint, the server remains the source of truth for validity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Extract the `exp` claim (epoch seconds) from a JWT, if the token carries one
pub fn expiry_claim(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: ExpiryClaims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}

/// Seconds of validity left per the token's own expiry claim.
/// Returns `None` for opaque tokens; callers fall back to issuance arithmetic.
pub fn remaining_secs(token: &str, now: i64) -> Option<i64> {
    expiry_claim(token).map(|exp| exp - now)
}

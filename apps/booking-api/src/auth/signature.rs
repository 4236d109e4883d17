//! HMAC-SHA256 signatures over raw request bodies.
//!
//! Header format: `t=<unix seconds>,v1=<hex digest>[,v1=<hex digest>...]`.
//! The digest covers `"<t>.<body>"`. Several `v1` entries are accepted so the
//! sender can rotate secrets.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ApiError;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature timestamp outside the allowed window")]
    Expired,
    #[error("Signature does not match payload")]
    Mismatch,
}

/// Produce a signature header value for `body`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let digest = mac_for(secret, timestamp, body).finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(digest))
}

/// Check a signature header against `body` at time `now` (unix seconds).
pub fn verify(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return Err(SignatureError::Expired);
    }

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .ok()
            .map(|expected| mac_for(secret, timestamp, body).verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Raw request body whose `X-Payment-Signature` header verified against the
/// configured webhook secret.
#[derive(Debug, Clone)]
pub struct SignedBody(pub Bytes);

impl FromRequest<AppState> for SignedBody {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::bad_request("Unreadable request body"))?;

        let result = match header {
            Some(header) => verify(
                &state.config.webhook_secret,
                &header,
                &body,
                state.config.signature_tolerance,
                chrono::Utc::now().timestamp(),
            ),
            None => Err(SignatureError::Missing),
        };

        match result {
            Ok(()) => Ok(SignedBody(body)),
            Err(err) => {
                tracing::warn!(%err, "rejected signed request");
                Err(ApiError::unauthorized(err.to_string()))
            }
        }
    }
}

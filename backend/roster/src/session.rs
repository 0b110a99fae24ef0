//! # Session Tokens
//!
//! The `session` cookie gating the roster page.
//!
//! ## Format
//! - `{uid}.{expires}.{mac}`
//! - `expires`: unix seconds
//! - `mac`: hex HMAC-SHA256 over `{uid}.{expires}` with the shared secret
//!
//! ## Verification
//! - Signature compared in constant time
//! - Expired tokens are rejected
//! - The user identifier doubles as the document id, so it is restricted to `[A-Za-z0-9_-]{1,128}`
use std::sync::LazyLock;

use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

static USER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("user id pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub expires: i64,
}

/// Checks a session credential and names the user behind it.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str, now: i64) -> Result<Identity, SessionError>;
}

pub struct HmacSessions {
    secret: Vec<u8>,
}

impl HmacSessions {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, SessionError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SessionError::Key);
        }

        Ok(Self { secret })
    }

    pub fn mint(&self, user_id: &str, expires: i64) -> Result<String, SessionError> {
        if !USER_ID.is_match(user_id) {
            return Err(SessionError::InvalidUser);
        }

        let payload = format!("{user_id}.{expires}");
        let mac = self.sign(payload.as_bytes())?;

        Ok(format!("{payload}.{}", hex::encode(mac)))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| SessionError::Key)?;
        mac.update(payload);

        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl SessionVerifier for HmacSessions {
    fn verify(&self, token: &str, now: i64) -> Result<Identity, SessionError> {
        let (payload, mac) = token.rsplit_once('.').ok_or(SessionError::Malformed)?;
        let (user_id, expires) = payload.rsplit_once('.').ok_or(SessionError::Malformed)?;

        let given = hex::decode(mac).map_err(|_| SessionError::Malformed)?;
        let expected = self.sign(payload.as_bytes())?;
        if given.len() != expected.len() || !bool::from(given.ct_eq(expected.as_slice())) {
            return Err(SessionError::BadSignature);
        }

        let expires: i64 = expires.parse().map_err(|_| SessionError::Malformed)?;
        if expires <= now {
            return Err(SessionError::Expired);
        }

        if !USER_ID.is_match(user_id) {
            return Err(SessionError::InvalidUser);
        }

        Ok(Identity {
            user_id: user_id.to_string(),
            expires,
        })
    }
}

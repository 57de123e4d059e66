//! Signed session tokens.
//!
//! A session token proves "the server logged this player in as this name"
//! and can be presented on any later connection, unlike the resume token,
//! which only lives as long as the in-memory session.
//!
//! Layout (all ASCII, dot separated):
//!
//! ```text
//! <player id>.<expires unix secs>.<hex(name)>.<hex(tag)>
//! ```
//!
//! `tag = HMAC-SHA256(secret, payload)`, where `payload` is the first three
//! fields joined by dots.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use partyhall_protocol::PlayerId;
use sha2::Sha256;

use crate::SessionError;

type HmacSha256 = Hmac<Sha256>;

/// What a verified token says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub player_id: PlayerId,
    pub name: String,
    /// Unix seconds after which the token is refused.
    pub expires_at: u64,
}

/// Issues and verifies session tokens with one server secret.
#[derive(Clone)]
pub struct TokenSigner {
    /// Keyed once; cloned per token.
    mac: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenSigner {
    /// Default token lifetime: one day.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Creates a signer. `ttl` is how long issued tokens stay valid.
    ///
    /// # Errors
    /// [`SessionError::InvalidSecret`] for an empty secret.
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, SessionError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SessionError::InvalidSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| SessionError::InvalidSecret)?;
        Ok(Self { mac, ttl })
    }

    /// Issues a token valid from now.
    pub fn issue(&self, player_id: PlayerId, name: &str) -> String {
        self.issue_at(player_id, name, unix_now())
    }

    /// Issues a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, player_id: PlayerId, name: &str, now: u64) -> String {
        let expires_at = now.saturating_add(self.ttl.as_secs());
        let payload = format!("{}.{}.{}", player_id.0, expires_at, hex::encode(name));
        let tag = self.keyed(&payload).finalize().into_bytes();
        format!("{payload}.{}", hex::encode(tag))
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        self.verify_at(token, unix_now())
    }

    /// Verifies a token as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// - [`SessionError::BadSignature`] for anything malformed or forged
    /// - [`SessionError::TokenExpired`] for a valid token past its lifetime
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, SessionError> {
        let (payload, tag_hex) = token.rsplit_once('.').ok_or(SessionError::BadSignature)?;
        let tag = hex::decode(tag_hex).map_err(|_| SessionError::BadSignature)?;
        self.keyed(payload)
            .verify_slice(&tag)
            .map_err(|_| SessionError::BadSignature)?;

        let mut fields = payload.splitn(3, '.');
        let (Some(id), Some(expires), Some(name_hex)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(SessionError::BadSignature);
        };
        let player_id = id.parse::<u64>().map_err(|_| SessionError::BadSignature)?;
        let expires_at = expires.parse::<u64>().map_err(|_| SessionError::BadSignature)?;
        let name = hex::decode(name_hex)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(SessionError::BadSignature)?;

        if now > expires_at {
            return Err(SessionError::TokenExpired);
        }

        Ok(Claims {
            player_id: PlayerId(player_id),
            name,
            expires_at,
        })
    }

    fn keyed(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

//! Authentication hook for validating player identity.
//!
//! Account storage is outside this server. The [`Authenticator`] trait is
//! the seam: it turns the [`Credentials`] from a `Login` message into an
//! [`Identity`]. [`TokenAuthenticator`] is the built-in implementation; it
//! trusts tokens signed by this server and optionally lets guests in by
//! name.

use std::sync::atomic::{AtomicU64, Ordering};

use partyhall_protocol::{Credentials, PlayerId};

use crate::{SessionError, TokenSigner};

/// Longest display name accepted at login.
const MAX_NAME_LEN: usize = 24;

/// Who a set of credentials belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: PlayerId,
    pub name: String,
}

/// Validates a client's credentials and returns their identity.
///
/// `Send + Sync + 'static` because one authenticator serves every
/// connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use partyhall_protocol::{Credentials, PlayerId};
/// use partyhall_session::{Authenticator, Identity, SessionError};
///
/// /// Uses the name as a numeric player id. Test fixture only.
/// struct NumericAuth;
///
/// impl Authenticator for NumericAuth {
///     async fn authenticate(
///         &self,
///         credentials: &Credentials,
///     ) -> Result<Identity, SessionError> {
///         let id: u64 = credentials.name.parse().map_err(|_| {
///             SessionError::AuthFailed("name must be a number".into())
///         })?;
///         Ok(Identity { player_id: PlayerId(id), name: credentials.name.clone() })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given credentials.
    ///
    /// `credentials.resume` is handled by the session manager before this
    /// is called; implementations only look at `name` and `token`.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}

/// Accepts signed session tokens, and guest names when enabled.
#[derive(Debug)]
pub struct TokenAuthenticator {
    signer: TokenSigner,
    allow_guests: bool,
    next_guest: AtomicU64,
}

impl TokenAuthenticator {
    /// Creates an authenticator around `signer`.
    pub fn new(signer: TokenSigner, allow_guests: bool) -> Self {
        Self {
            signer,
            allow_guests,
            next_guest: AtomicU64::new(1),
        }
    }

    /// The signer used to issue tokens at login.
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }
}

impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
        if let Some(token) = credentials.token.as_deref().filter(|t| !t.is_empty()) {
            let claims = self.signer.verify(token)?;
            return Ok(Identity {
                player_id: claims.player_id,
                name: claims.name,
            });
        }

        if !self.allow_guests {
            return Err(SessionError::AuthFailed("a session token is required".into()));
        }

        let name = normalize_name(&credentials.name)?;
        let player_id = PlayerId(self.next_guest.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%player_id, %name, "guest login");
        Ok(Identity { player_id, name })
    }
}

fn normalize_name(raw: &str) -> Result<String, SessionError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SessionError::AuthFailed("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(SessionError::AuthFailed(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::AuthFailed("name contains control characters".into()));
    }
    Ok(name.to_string())
}

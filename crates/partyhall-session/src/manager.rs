//! Bookkeeping for every player session on the server.
//!
//! Plain data behind `&mut self`: the server keeps one `SessionManager`
//! inside a `tokio::sync::Mutex` and holds the lock only for the call
//! itself, never across a room round-trip.

use std::collections::HashMap;
use std::time::Instant;

use partyhall_protocol::PlayerId;
use rand::Rng;
use tracing::{debug, info};

use crate::{Identity, Session, SessionConfig, SessionError, SessionState};

/// Result of [`SessionManager::login`] or [`SessionManager::resume`].
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Always Connected.
    pub session: Session,
    /// Another live connection held this session and must be kicked.
    pub replaced: bool,
}

/// Sessions by player, plus a reverse index from resume token.
///
/// ```text
/// login ─▶ Connected ─ disconnect ─▶ Disconnected ─ resume ─▶ Connected
///                                         │
///                              expire_stale (grace over)
///                                         ▼
///                                      Expired ─ cleanup_expired ─▶ gone
/// ```
pub struct SessionManager {
    by_player: HashMap<PlayerId, Session>,
    by_token: HashMap<String, PlayerId>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            by_player: HashMap::new(),
            by_token: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens a new session for `identity`, discarding any older one along
    /// with its resume token. `replaced` reports whether the older one was
    /// still Connected.
    pub fn login(&mut self, identity: Identity) -> LoginOutcome {
        let replaced = self
            .by_player
            .remove(&identity.player_id)
            .map(|old| {
                self.by_token.remove(&old.reconnect_token);
                old.is_connected()
            })
            .unwrap_or(false);

        let session = Session {
            player_id: identity.player_id,
            name: identity.name,
            state: SessionState::Connected,
            reconnect_token: fresh_token(),
        };
        self.by_token
            .insert(session.reconnect_token.clone(), session.player_id);
        self.by_player.insert(session.player_id, session.clone());

        info!(player_id = %session.player_id, replaced, "login");
        LoginOutcome { session, replaced }
    }

    /// Starts the grace clock for `player_id`.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the player has no session.
    pub fn disconnect(&mut self, player_id: PlayerId) -> Result<(), SessionError> {
        let session = self
            .by_player
            .get_mut(&player_id)
            .ok_or(SessionError::NotFound(player_id))?;
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        info!(%player_id, grace = ?self.config.reconnect_grace, "session disconnected");
        Ok(())
    }

    /// Reattaches the session owning `token`.
    ///
    /// Works from Disconnected within grace, and from Connected when the
    /// previous socket has not been noticed dead yet (a takeover, reported
    /// through `replaced`).
    ///
    /// # Errors
    /// [`SessionError::InvalidToken`] for an unknown token, and
    /// [`SessionError::SessionExpired`] once grace has run out.
    pub fn resume(&mut self, token: &str) -> Result<LoginOutcome, SessionError> {
        let grace = self.config.reconnect_grace;
        let session = self
            .by_token
            .get(token)
            .and_then(|player_id| self.by_player.get_mut(player_id))
            .ok_or(SessionError::InvalidToken)?;
        let player_id = session.player_id;

        if session.outlived_grace(grace) {
            session.state = SessionState::Expired;
        }
        let replaced = match session.state {
            SessionState::Expired => return Err(SessionError::SessionExpired(player_id)),
            SessionState::Connected => true,
            SessionState::Disconnected { .. } => false,
        };

        session.state = SessionState::Connected;
        info!(%player_id, replaced, "session resumed");
        Ok(LoginOutcome {
            session: session.clone(),
            replaced,
        })
    }

    /// Drops the session for good. Its resume token stops working at once.
    pub fn logout(&mut self, player_id: PlayerId) -> Option<Session> {
        let session = self.by_player.remove(&player_id)?;
        self.by_token.remove(&session.reconnect_token);
        info!(%player_id, "logout");
        Some(session)
    }

    /// Marks every session past its grace period Expired and returns who
    /// was marked, so the caller can react before
    /// [`cleanup_expired`](Self::cleanup_expired) deletes them.
    pub fn expire_stale(&mut self) -> Vec<PlayerId> {
        let grace = self.config.reconnect_grace;
        self.by_player
            .values_mut()
            .filter(|session| session.outlived_grace(grace))
            .map(|session| {
                session.state = SessionState::Expired;
                info!(player_id = %session.player_id, "session expired");
                session.player_id
            })
            .collect()
    }

    /// Deletes Expired sessions and their tokens.
    pub fn cleanup_expired(&mut self) {
        let by_token = &mut self.by_token;
        let before = self.by_player.len();
        self.by_player.retain(|_, session| {
            let keep = !matches!(session.state, SessionState::Expired);
            if !keep {
                by_token.remove(&session.reconnect_token);
            }
            keep
        });
        let removed = before - self.by_player.len();
        if removed > 0 {
            debug!(removed, "expired sessions removed");
        }
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<&Session> {
        self.by_player.get(player_id)
    }

    /// Sessions in any state.
    pub fn len(&self) -> usize {
        self.by_player.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_player.is_empty()
    }
}

fn fresh_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    //! Grace is either zero (anything disconnected expires after a short
    //! sleep) or an hour (nothing expires during the test).

    use std::time::Duration;

    use super::*;

    fn strict() -> SessionManager {
        SessionManager::new(SessionConfig {
            reconnect_grace: Duration::ZERO,
        })
    }

    fn lenient() -> SessionManager {
        SessionManager::new(SessionConfig {
            reconnect_grace: Duration::from_secs(3600),
        })
    }

    fn who(id: u64) -> Identity {
        Identity {
            player_id: PlayerId(id),
            name: format!("guest-{id}"),
        }
    }

    /// `elapsed > ZERO` needs a measurable gap.
    fn tick_clock() {
        std::thread::sleep(Duration::from_millis(2));
    }

    // =====================================================================
    // login()
    // =====================================================================

    #[test]
    fn test_login_fresh_player_is_connected_with_hex_token() {
        let mut mgr = lenient();

        let out = mgr.login(who(1));

        assert!(out.session.is_connected());
        assert!(!out.replaced);
        assert_eq!(out.session.name, "guest-1");
        assert_eq!(out.session.reconnect_token.len(), 32);
        assert!(out.session.reconnect_token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_login_twice_while_connected_flags_replacement() {
        let mut mgr = lenient();
        let first = mgr.login(who(1)).session.reconnect_token;

        let out = mgr.login(who(1));

        assert!(out.replaced);
        assert_ne!(out.session.reconnect_token, first);
        assert!(matches!(mgr.resume(&first), Err(SessionError::InvalidToken)));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_login_over_disconnected_session_is_not_a_takeover() {
        let mut mgr = lenient();
        mgr.login(who(1));
        mgr.disconnect(PlayerId(1)).unwrap();

        assert!(!mgr.login(who(1)).replaced);
    }

    // =====================================================================
    // disconnect()
    // =====================================================================

    #[test]
    fn test_disconnect_keeps_session_and_token() {
        let mut mgr = lenient();
        let token = mgr.login(who(1)).session.reconnect_token;

        mgr.disconnect(PlayerId(1)).unwrap();

        let session = mgr.get(&PlayerId(1)).unwrap();
        assert!(matches!(session.state, SessionState::Disconnected { .. }));
        assert_eq!(session.reconnect_token, token);
    }

    #[test]
    fn test_disconnect_unknown_player_is_not_found() {
        let mut mgr = lenient();

        let err = mgr.disconnect(PlayerId(42)).unwrap_err();

        assert!(matches!(err, SessionError::NotFound(PlayerId(42))));
    }

    // =====================================================================
    // resume()
    // =====================================================================

    #[test]
    fn test_resume_within_grace_reconnects_same_player() {
        let mut mgr = lenient();
        let token = mgr.login(who(7)).session.reconnect_token;
        mgr.disconnect(PlayerId(7)).unwrap();

        let out = mgr.resume(&token).unwrap();

        assert_eq!(out.session.player_id, PlayerId(7));
        assert!(out.session.is_connected());
        assert!(!out.replaced);
    }

    #[test]
    fn test_resume_unknown_token_is_rejected() {
        let mut mgr = lenient();
        mgr.login(who(1));

        assert!(matches!(mgr.resume("feedface"), Err(SessionError::InvalidToken)));
    }

    #[test]
    fn test_resume_after_grace_marks_expired() {
        let mut mgr = strict();
        let token = mgr.login(who(1)).session.reconnect_token;
        mgr.disconnect(PlayerId(1)).unwrap();
        tick_clock();

        let err = mgr.resume(&token).unwrap_err();

        assert!(matches!(err, SessionError::SessionExpired(PlayerId(1))));
        assert!(matches!(mgr.get(&PlayerId(1)).unwrap().state, SessionState::Expired));
        assert!(
            matches!(mgr.resume(&token), Err(SessionError::SessionExpired(_))),
            "an expired session stays expired"
        );
    }

    #[test]
    fn test_resume_live_session_is_a_takeover() {
        let mut mgr = lenient();
        let token = mgr.login(who(1)).session.reconnect_token;

        let out = mgr.resume(&token).unwrap();

        assert!(out.replaced);
        assert_eq!(out.session.reconnect_token, token);
    }

    // =====================================================================
    // logout()
    // =====================================================================

    #[test]
    fn test_logout_forgets_session_and_token() {
        let mut mgr = lenient();
        let token = mgr.login(who(1)).session.reconnect_token;

        let gone = mgr.logout(PlayerId(1)).map(|s| s.player_id);

        assert_eq!(gone, Some(PlayerId(1)));
        assert!(mgr.is_empty());
        assert!(matches!(mgr.resume(&token), Err(SessionError::InvalidToken)));
        assert!(mgr.logout(PlayerId(1)).is_none());
    }

    // =====================================================================
    // expire_stale() / cleanup_expired()
    // =====================================================================

    #[test]
    fn test_expire_stale_only_touches_disconnected_past_grace() {
        let mut mgr = strict();
        mgr.login(who(1));
        mgr.login(who(2));
        mgr.disconnect(PlayerId(1)).unwrap();
        tick_clock();

        assert_eq!(mgr.expire_stale(), vec![PlayerId(1)]);
        assert!(mgr.get(&PlayerId(2)).unwrap().is_connected());
        assert!(mgr.expire_stale().is_empty(), "already expired is not reported twice");
    }

    #[test]
    fn test_expire_stale_within_grace_is_noop() {
        let mut mgr = lenient();
        mgr.login(who(1));
        mgr.disconnect(PlayerId(1)).unwrap();

        assert!(mgr.expire_stale().is_empty());
    }

    #[test]
    fn test_cleanup_expired_deletes_session_and_token() {
        let mut mgr = strict();
        let token = mgr.login(who(1)).session.reconnect_token;
        mgr.login(who(2));
        mgr.disconnect(PlayerId(1)).unwrap();
        tick_clock();
        mgr.expire_stale();

        mgr.cleanup_expired();

        assert_eq!(mgr.len(), 1);
        assert!(mgr.get(&PlayerId(1)).is_none());
        assert!(matches!(mgr.resume(&token), Err(SessionError::InvalidToken)));
    }

    #[test]
    fn test_two_players_drop_and_resume_independently() {
        let mut mgr = lenient();
        let a = mgr.login(who(1)).session.reconnect_token;
        let b = mgr.login(who(2)).session.reconnect_token;

        mgr.disconnect(PlayerId(1)).unwrap();
        assert!(mgr.get(&PlayerId(2)).unwrap().is_connected());
        mgr.disconnect(PlayerId(2)).unwrap();
        mgr.resume(&b).unwrap();
        mgr.resume(&a).unwrap();

        assert!(mgr.get(&PlayerId(1)).unwrap().is_connected());
        assert!(mgr.get(&PlayerId(2)).unwrap().is_connected());
    }
}

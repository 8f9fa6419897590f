//! Connection registry with deferred destruction.
//!
//! A session removes itself with [`ConnectionManager::remove`] while its own
//! call stack may still be running; actual destruction happens in the
//! manager's [`ConnectionManager::drain`] cycle.

use crate::session::RtcSession;
use log::info;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Default)]
pub struct ConnectionManager {
    sessions: HashMap<String, RtcSession>,
    zombies: Vec<String>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn add(&mut self, session: RtcSession) -> Option<RtcSession> {
        self.sessions.insert(session.username().to_string(), session)
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut RtcSession> {
        self.sessions.get_mut(username)
    }

    /// Mark a session for removal. Idempotent; destruction is deferred to
    /// [`ConnectionManager::drain`].
    pub fn remove(&mut self, username: &str) {
        if self.sessions.contains_key(username) && !self.zombies.iter().any(|z| z == username) {
            self.zombies.push(username.to_string());
        }
    }

    /// Expire sessions whose STUN keepalive lapsed.
    pub fn reap(&mut self, now: Instant) {
        let dead: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_alive(now))
            .map(|(k, _)| k.clone())
            .collect();
        for username in dead {
            if let Some(session) = self.sessions.get_mut(&username) {
                info!("session {username} timed out, expire it");
                session.expire();
            }
            self.remove(&username);
        }
    }

    /// Destroy everything marked for removal.
    pub fn drain(&mut self) -> usize {
        let mut destroyed = 0;
        for username in std::mem::take(&mut self.zombies) {
            if let Some(mut session) = self.sessions.remove(&username) {
                session.on_before_dispose();
                session.on_disposing();
                destroyed += 1;
            }
        }
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use std::time::Duration;

    fn session(name: &str) -> RtcSession {
        RtcSession::new(SessionConfig {
            username: name.to_string(),
            session_timeout: Duration::from_secs(30),
            ..Default::default()
        })
    }

    #[test]
    fn test_remove_is_deferred_and_idempotent() {
        let mut manager = ConnectionManager::new();
        manager.add(session("a:b"));
        assert_eq!(manager.len(), 1);

        manager.remove("a:b");
        manager.remove("a:b");
        // still present until the drain cycle
        assert_eq!(manager.len(), 1);

        assert_eq!(manager.drain(), 1);
        assert!(manager.is_empty());
        assert_eq!(manager.drain(), 0);
    }

    #[test]
    fn test_reap_expires_dead_sessions() {
        let mut manager = ConnectionManager::new();
        let mut s = session("x:y");
        let t0 = Instant::now();
        s.alive(t0);
        manager.add(s);

        // within the timeout nothing happens
        manager.reap(t0 + Duration::from_secs(10));
        assert_eq!(manager.len(), 1);

        manager.reap(t0 + Duration::from_secs(31));
        assert_eq!(manager.drain(), 1);
        assert!(manager.is_empty());
    }
}

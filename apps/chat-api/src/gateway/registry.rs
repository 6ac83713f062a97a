//! Authoritative in-memory index of live sessions.
//!
//! Keyed three ways: by session id, by user id, and by room id. The three
//! indices live behind one `RwLock` and mutate together — a session removed
//! from the user index but still visible in a room would be an invariant
//! violation, so no partial updates are possible.
//!
//! State is per-process. A multi-process deployment needs an external
//! pub/sub layer for cross-process presence; none is assumed here.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::ids::{CompanyId, RoomId, SessionId, UserId};

use super::events::ServerEvent;

/// Outbound channel to one session's socket task. Unbounded: pushes never
/// block the caller; a dead socket surfaces as a send error.
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

/// Identity captured at authentication time. Immutable for the session's
/// lifetime.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub user_name: String,
    pub company_name: String,
}

struct SessionEntry {
    info: SessionInfo,
    rooms: HashSet<RoomId>,
    sender: OutboundSender,
    last_activity: Instant,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SessionEntry>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
    by_room: HashMap<RoomId, HashSet<SessionId>>,
}

/// What a removal gives back so the caller can announce the departure to the
/// rooms it vacated.
#[derive(Debug, Clone)]
pub struct RemovedSession {
    pub info: SessionInfo,
    pub rooms: Vec<RoomId>,
    /// True when this was the user's last live session — the user just went
    /// offline.
    pub last_of_user: bool,
}

pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a session. Idempotent on session id. Returns `false` without
    /// registering when the identity is incomplete.
    pub fn add_session(&self, info: SessionInfo, sender: OutboundSender) -> bool {
        if info.user_id.is_blank() || info.company_id.is_blank() {
            return false;
        }
        let mut inner = self.inner.write();
        if inner.sessions.contains_key(&info.id) {
            return true;
        }
        inner
            .by_user
            .entry(info.user_id.clone())
            .or_default()
            .insert(info.id.clone());
        inner.sessions.insert(
            info.id.clone(),
            SessionEntry {
                info,
                rooms: HashSet::new(),
                sender,
                last_activity: Instant::now(),
            },
        );
        true
    }

    /// Remove a session from every index. Returns what was removed, or `None`
    /// for an unknown id.
    pub fn remove_session(&self, id: &SessionId) -> Option<RemovedSession> {
        let mut inner = self.inner.write();
        let entry = inner.sessions.remove(id)?;

        let mut rooms: Vec<RoomId> = Vec::with_capacity(entry.rooms.len());
        for room in &entry.rooms {
            if let Some(members) = inner.by_room.get_mut(room) {
                members.remove(id);
                if members.is_empty() {
                    inner.by_room.remove(room);
                }
            }
            rooms.push(room.clone());
        }
        rooms.sort();

        let mut last_of_user = false;
        if let Some(sessions) = inner.by_user.get_mut(&entry.info.user_id) {
            sessions.remove(id);
            if sessions.is_empty() {
                inner.by_user.remove(&entry.info.user_id);
                last_of_user = true;
            }
        }

        Some(RemovedSession {
            info: entry.info,
            rooms,
            last_of_user,
        })
    }

    /// No-op (`false`) when the session is unknown.
    pub fn join_room(&self, id: &SessionId, room: &RoomId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.get_mut(id) else {
            return false;
        };
        entry.rooms.insert(room.clone());
        inner.by_room.entry(room.clone()).or_default().insert(id.clone());
        true
    }

    /// Leaves the room and prunes it once empty. No-op (`false`) when the
    /// session is unknown or wasn't a member.
    pub fn leave_room(&self, id: &SessionId, room: &RoomId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.get_mut(id) else {
            return false;
        };
        if !entry.rooms.remove(room) {
            return false;
        }
        if let Some(members) = inner.by_room.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                inner.by_room.remove(room);
            }
        }
        true
    }

    pub fn session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.inner.read().sessions.get(id).map(|e| e.info.clone())
    }

    pub fn sessions_for_user(&self, user: &UserId) -> Vec<SessionId> {
        self.inner
            .read()
            .by_user
            .get(user)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sessions_in_room(&self, room: &RoomId) -> Vec<SessionId> {
        self.inner
            .read()
            .by_room
            .get(room)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_user_online(&self, user: &UserId) -> bool {
        self.inner
            .read()
            .by_user
            .get(user)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Presence is derived: a company is online when any of its sessions is.
    pub fn is_company_online(&self, company: &CompanyId) -> bool {
        self.inner
            .read()
            .sessions
            .values()
            .any(|e| e.info.company_id == *company)
    }

    /// Every live session whose active company matches.
    pub fn company_sessions(&self, company: &CompanyId) -> Vec<SessionId> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|e| e.info.company_id == *company)
            .map(|e| e.info.id.clone())
            .collect()
    }

    /// Distinct online users of one company, with display names.
    pub fn online_users_for_company(&self, company: &CompanyId) -> Vec<(UserId, String)> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        let mut users = Vec::new();
        for entry in inner.sessions.values() {
            if entry.info.company_id == *company && seen.insert(entry.info.user_id.clone()) {
                users.push((entry.info.user_id.clone(), entry.info.user_name.clone()));
            }
        }
        users
    }

    /// Update the session's last-activity timestamp (heartbeat or any
    /// inbound event).
    pub fn touch(&self, id: &SessionId) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Push one event to one session. `false` when the session is unknown or
    /// its socket task is gone.
    pub fn send_to(&self, id: &SessionId, event: ServerEvent) -> bool {
        let sender = match self.inner.read().sessions.get(id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };
        sender.send(event).is_ok()
    }

    /// Evict every session idle longer than `max_idle`. Returns the evicted
    /// sessions so the caller can broadcast departures. Dropping the entry
    /// also drops its outbound sender, which ends the socket task.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<RemovedSession> {
        let now = Instant::now();
        let expired: Vec<SessionId> = {
            let inner = self.inner.read();
            inner
                .sessions
                .values()
                .filter(|e| now.duration_since(e.last_activity) >= max_idle)
                .map(|e| e.info.id.clone())
                .collect()
        };
        expired
            .iter()
            .filter_map(|id| self.remove_session(id))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn make_session(
        id: &str,
        user: &str,
        company: &str,
    ) -> (SessionInfo, OutboundSender, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = SessionInfo {
            id: SessionId::new(id),
            user_id: UserId::new(user),
            company_id: CompanyId::new(company),
            user_name: format!("{user} name"),
            company_name: format!("{company} name"),
        };
        (info, tx, rx)
    }

    #[test]
    fn add_session_rejects_incomplete_identity() {
        let registry = ConnectionRegistry::new();
        let (mut info, tx, _rx) = make_session("s1", "u1", "c1");
        info.user_id = UserId::new("");
        assert!(!registry.add_session(info, tx));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn add_session_is_idempotent_on_id() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        assert!(registry.add_session(info.clone(), tx));
        let (_, tx2, _rx2) = make_session("s1", "u1", "c1");
        assert!(registry.add_session(info, tx2));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.sessions_for_user(&UserId::new("u1")).len(), 1);
    }

    #[test]
    fn remove_session_clears_every_index() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        let room = RoomId::new("company_chat_c1_c2");
        registry.join_room(&SessionId::new("s1"), &room);
        assert_eq!(registry.sessions_in_room(&room).len(), 1);

        let removed = registry.remove_session(&SessionId::new("s1")).unwrap();
        assert_eq!(removed.rooms, vec![room.clone()]);
        assert!(removed.last_of_user);
        assert!(!registry.is_user_online(&UserId::new("u1")));
        assert!(registry.sessions_in_room(&room).is_empty());
    }

    #[test]
    fn remove_unknown_session_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove_session(&SessionId::new("ghost")).is_none());
    }

    #[test]
    fn multi_session_user_stays_online_until_last_disconnect() {
        let registry = ConnectionRegistry::new();
        let (info1, tx1, _rx1) = make_session("s1", "u1", "c1");
        let (info2, tx2, _rx2) = make_session("s2", "u1", "c1");
        registry.add_session(info1, tx1);
        registry.add_session(info2, tx2);

        let room = RoomId::new("company_chat_c1_c2");
        registry.join_room(&SessionId::new("s1"), &room);
        registry.join_room(&SessionId::new("s2"), &room);
        assert_eq!(registry.sessions_in_room(&room).len(), 2);

        let removed = registry.remove_session(&SessionId::new("s1")).unwrap();
        assert!(!removed.last_of_user);
        assert!(registry.is_user_online(&UserId::new("u1")));
        assert_eq!(registry.sessions_in_room(&room).len(), 1);

        let removed = registry.remove_session(&SessionId::new("s2")).unwrap();
        assert!(removed.last_of_user);
        assert!(!registry.is_user_online(&UserId::new("u1")));
    }

    #[test]
    fn join_and_leave_room_require_known_session() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::new("company_chat_c1_c2");
        assert!(!registry.join_room(&SessionId::new("ghost"), &room));
        assert!(!registry.leave_room(&SessionId::new("ghost"), &room));
    }

    #[test]
    fn leave_room_prunes_empty_rooms() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        let room = RoomId::new("company_chat_c1_c2");
        let session = SessionId::new("s1");
        registry.join_room(&session, &room);
        assert!(registry.leave_room(&session, &room));
        // Leaving again is a no-op.
        assert!(!registry.leave_room(&session, &room));
        assert!(registry.sessions_in_room(&room).is_empty());
    }

    #[test]
    fn company_presence_scans_sessions() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        assert!(registry.is_company_online(&CompanyId::new("c1")));
        assert!(!registry.is_company_online(&CompanyId::new("c2")));
        assert_eq!(registry.company_sessions(&CompanyId::new("c1")).len(), 1);
    }

    #[test]
    fn online_users_dedupes_multi_session_users() {
        let registry = ConnectionRegistry::new();
        let (info1, tx1, _rx1) = make_session("s1", "u1", "c1");
        let (info2, tx2, _rx2) = make_session("s2", "u1", "c1");
        let (info3, tx3, _rx3) = make_session("s3", "u2", "c1");
        registry.add_session(info1, tx1);
        registry.add_session(info2, tx2);
        registry.add_session(info3, tx3);

        let mut users = registry.online_users_for_company(&CompanyId::new("c1"));
        users.sort();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].0, UserId::new("u1"));
        assert_eq!(users[1].0, UserId::new("u2"));
    }

    #[test]
    fn send_to_delivers_and_reports_dead_sessions() {
        let registry = ConnectionRegistry::new();
        let (info, tx, mut rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        let session = SessionId::new("s1");
        assert!(registry.send_to(&session, ServerEvent::pong()));
        assert_eq!(rx.try_recv().unwrap().event, "pong");

        drop(rx);
        assert!(!registry.send_to(&session, ServerEvent::pong()));
        assert!(!registry.send_to(&SessionId::new("ghost"), ServerEvent::pong()));
    }

    #[test]
    fn sweep_with_zero_threshold_removes_everything() {
        let registry = ConnectionRegistry::new();
        let (info1, tx1, _rx1) = make_session("s1", "u1", "c1");
        let (info2, tx2, _rx2) = make_session("s2", "u2", "c2");
        registry.add_session(info1, tx1);
        registry.add_session(info2, tx2);

        let removed = registry.sweep_idle(Duration::ZERO);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn sweep_spares_recently_active_sessions() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        let removed = registry.sweep_idle(Duration::from_secs(60));
        assert!(removed.is_empty());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn touch_refreshes_activity() {
        let registry = ConnectionRegistry::new();
        let (info, tx, _rx) = make_session("s1", "u1", "c1");
        registry.add_session(info, tx);

        assert!(registry.touch(&SessionId::new("s1")));
        assert!(!registry.touch(&SessionId::new("ghost")));
    }
}

//! Fan-out of events to live sessions.
//!
//! The delivery policy for a new message between companies A and B is
//! triple-redundant: the `{A, B}` chat room, A's company channel, and B's
//! company channel. A session may have joined the chat room, only its
//! company channel, or (mid-reconnect) neither — the union maximizes
//! delivery. Targets are collected into a set first, so a session present in
//! more than one target still receives the event exactly once.
//!
//! A failed push to one session is logged and skipped; it never aborts the
//! rest of a fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::TransportError;
use crate::ids::{CompanyId, RoomId, SessionId, UserId};
use crate::models::message::ChatMessage;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;
use super::rooms;

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    /// Extra pass over all live sessions of the two companies, catching
    /// clients that have not joined any room yet. Deduped like everything
    /// else; switchable off once clients provably join before sending.
    fallback_company_scan: bool,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, fallback_company_scan: bool) -> Self {
        Self {
            registry,
            fallback_company_scan,
        }
    }

    /// Unicast. `false` when the session is unknown or its socket is gone.
    pub fn to_session(&self, session: &SessionId, event: ServerEvent) -> bool {
        let delivered = self.registry.send_to(session, event);
        if !delivered {
            let err = TransportError {
                session_id: session.clone(),
            };
            tracing::debug!(%err, "dropping outbound event");
        }
        delivered
    }

    /// Push to every session in a room. An empty room is a silent no-op.
    /// Returns the number of sessions reached.
    pub fn to_room(&self, room: &RoomId, event: &ServerEvent) -> usize {
        self.push_all(self.registry.sessions_in_room(room).into_iter().collect(), event)
    }

    /// Like [`to_room`], excluding one session (the actor itself).
    pub fn to_room_except(&self, room: &RoomId, except: &SessionId, event: &ServerEvent) -> usize {
        let targets: HashSet<SessionId> = self
            .registry
            .sessions_in_room(room)
            .into_iter()
            .filter(|s| s != except)
            .collect();
        self.push_all(targets, event)
    }

    /// Push to every session of one user. `true` when at least one session
    /// was reached.
    pub fn to_user(&self, user: &UserId, event: &ServerEvent) -> bool {
        let targets: HashSet<SessionId> = self.registry.sessions_for_user(user).into_iter().collect();
        self.push_all(targets, event) > 0
    }

    /// Push to every session in a company's channel. `true` when at least one
    /// session was reached.
    pub fn to_company(&self, company: &CompanyId, event: &ServerEvent) -> bool {
        self.to_room(&rooms::company_channel(company), event) > 0
    }

    /// The three-target fan-out for anything scoped to the `{a, b}`
    /// conversation: chat room, plus both company channels, deduplicated.
    pub fn fan_out_pair(&self, a: &CompanyId, b: &CompanyId, event: &ServerEvent) -> usize {
        let mut targets: HashSet<SessionId> = HashSet::new();

        if let Some(room) = rooms::chat_room_id(a, b) {
            targets.extend(self.registry.sessions_in_room(&room));
        }
        targets.extend(self.registry.sessions_in_room(&rooms::company_channel(a)));
        targets.extend(self.registry.sessions_in_room(&rooms::company_channel(b)));

        if self.fallback_company_scan {
            targets.extend(self.registry.company_sessions(a));
            targets.extend(self.registry.company_sessions(b));
        }

        self.push_all(targets, event)
    }

    /// Fan a freshly persisted message out as `new_message`.
    pub fn fan_out_message(&self, message: &ChatMessage) -> usize {
        self.fan_out_pair(
            &message.sender_company_id,
            &message.receiver_company_id,
            &ServerEvent::new_message(message),
        )
    }

    fn push_all(&self, targets: HashSet<SessionId>, event: &ServerEvent) -> usize {
        let mut reached = 0;
        for session in targets {
            if self.registry.send_to(&session, event.clone()) {
                reached += 1;
            } else {
                let err = TransportError {
                    session_id: session,
                };
                tracing::debug!(%err, event = event.event, "skipping dead session in fan-out");
            }
        }
        reached
    }
}

//! Validates, persists, and fans out inbound chat traffic.
//!
//! Ordering guarantee: the broadcast happens strictly after the persistence
//! call has resolved. While a save is pending nothing is pushed, so room
//! broadcast order matches persistence-commit order, not arrival order.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ChatError, ValidationError};
use crate::ids::{CompanyId, MessageId};
use crate::models::message::{
    ChatMessage, DeliveryStatus, MessageType, NewMessage, PartyRef,
};
use crate::store::{HistoryQuery, MessagePage, MessageStore};

use super::broadcaster::Broadcaster;
use super::events::{
    EventName, HistoryPayload, MarkReadPayload, SendMessagePayload, ServerEvent,
};
use super::registry::SessionInfo;
use super::rooms;

pub struct MessageDispatcher {
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<Broadcaster>,
    max_content_length: usize,
}

/// What `validate_send` distills out of a raw payload.
struct ValidatedSend {
    receiver_company_id: CompanyId,
    content: String,
    message_type: MessageType,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<Broadcaster>,
        max_content_length: usize,
    ) -> Self {
        Self {
            store,
            broadcaster,
            max_content_length,
        }
    }

    /// Validate, persist, fan out, acknowledge. On a validation or storage
    /// failure nothing is broadcast; the caller reports the typed error to
    /// the sender only, with the correlation token intact.
    pub async fn dispatch(
        &self,
        sender: &SessionInfo,
        payload: SendMessagePayload,
    ) -> Result<ChatMessage, ChatError> {
        let validated = self.validate_send(sender, &payload)?;

        let party = payload.party_context_id.map(|id| PartyRef {
            id,
            name: payload.party_context_name,
        });

        let message = self
            .store
            .create(NewMessage {
                sender_company_id: sender.company_id.clone(),
                receiver_company_id: validated.receiver_company_id,
                sender_user_id: sender.user_id.clone(),
                sender_name: sender.user_name.clone(),
                content: validated.content,
                message_type: validated.message_type,
                status: DeliveryStatus::Sent,
                party,
                temp_id: payload.temp_id,
                attachments: payload.attachments.unwrap_or_default(),
            })
            .await
            .map_err(ChatError::Storage)?;

        // Persisted and acknowledged by the store — now fan out, then confirm
        // to the sender alone.
        self.broadcaster.fan_out_message(&message);
        self.broadcaster
            .to_session(&sender.id, ServerEvent::message_sent(&message));

        tracing::debug!(
            message_id = %message.id,
            from = %message.sender_company_id,
            to = %message.receiver_company_id,
            "message dispatched"
        );

        Ok(message)
    }

    fn validate_send(
        &self,
        sender: &SessionInfo,
        payload: &SendMessagePayload,
    ) -> Result<ValidatedSend, ValidationError> {
        if sender.company_id.is_blank() {
            return Err(ValidationError::missing_company("sender company id"));
        }
        let receiver = match &payload.party_id {
            Some(id) if !id.is_blank() => id.clone(),
            _ => return Err(ValidationError::missing_company("receiver company id")),
        };
        if receiver == sender.company_id {
            return Err(ValidationError::same_company());
        }

        let content = payload.content.as_deref().unwrap_or("").trim().to_string();
        if content.is_empty() {
            return Err(ValidationError::empty_content());
        }
        if content.chars().count() > self.max_content_length {
            return Err(ValidationError::content_too_long(self.max_content_length));
        }

        let message_type = match payload.message_type.as_deref() {
            None => MessageType::Internal,
            Some(raw) => MessageType::parse(raw)
                .ok_or_else(|| ValidationError::unknown_message_type(raw))?,
        };

        Ok(ValidatedSend {
            receiver_company_id: receiver,
            content,
            message_type,
        })
    }

    /// Best-effort, idempotent read marking. Returns how many messages
    /// actually transitioned; broadcasts `message_read` to the conversation
    /// when any did.
    pub async fn mark_read(
        &self,
        reader: &SessionInfo,
        payload: MarkReadPayload,
    ) -> Result<usize, ChatError> {
        let ids = payload.ids();
        if ids.is_empty() {
            return Ok(0);
        }

        let modified = self
            .store
            .mark_many_read(&ids, &reader.user_id)
            .await
            .map_err(ChatError::Storage)?;

        if modified > 0 {
            let event = ServerEvent::new(
                EventName::MESSAGE_READ,
                serde_json::json!({
                    "messageIds": ids,
                    "readBy": reader.user_id,
                    "timestamp": Utc::now(),
                }),
            );
            // The client tells us which room it was reading; recover the pair
            // from the canonical room id for the standard fan-out. Without a
            // usable hint, the reader's company channel still hears it.
            match payload.chat_room_id.as_ref().and_then(rooms::parse_chat_room) {
                Some((a, b)) => {
                    self.broadcaster.fan_out_pair(&a, &b, &event);
                }
                None => {
                    self.broadcaster.to_company(&reader.company_id, &event);
                }
            }
        }

        Ok(modified)
    }

    /// A receiving client acknowledged delivery. Monotonic: a late ack after
    /// `read` is a no-op. Status changes are fanned out to the conversation
    /// and the original sender's devices get a direct `message_delivered`.
    pub async fn mark_delivered(&self, message_id: &MessageId) -> Result<bool, ChatError> {
        let updated = self
            .store
            .update_status(message_id, DeliveryStatus::Delivered)
            .await
            .map_err(ChatError::Storage)?;

        let Some(message) = updated else {
            return Ok(false);
        };

        let status_event = ServerEvent::new(
            EventName::MESSAGE_STATUS_UPDATED,
            serde_json::json!({
                "messageId": message.id,
                "status": message.status,
                "timestamp": message.delivered_at,
            }),
        );
        self.broadcaster.fan_out_pair(
            &message.sender_company_id,
            &message.receiver_company_id,
            &status_event,
        );
        self.broadcaster.to_user(
            &message.sender_user_id,
            &ServerEvent::new(
                EventName::MESSAGE_DELIVERED,
                serde_json::json!({
                    "messageId": message.id,
                    "timestamp": message.delivered_at,
                }),
            ),
        );

        Ok(true)
    }

    /// Conversation history between the requester's company and `party`,
    /// newest first, with total-count pagination metadata.
    pub async fn history(
        &self,
        requester: &SessionInfo,
        payload: HistoryPayload,
    ) -> Result<MessagePage, ChatError> {
        let party = match &payload.party_id {
            Some(id) if !id.is_blank() => id.clone(),
            _ => {
                return Err(ChatError::Validation(ValidationError::missing_company(
                    "party company id",
                )))
            }
        };

        let message_type = match payload.message_type.as_deref() {
            None => None,
            Some(raw) => Some(
                MessageType::parse(raw)
                    .ok_or_else(|| ValidationError::unknown_message_type(raw))?,
            ),
        };

        let query = HistoryQuery {
            page: payload.page.unwrap_or(1).max(1),
            limit: payload.limit.unwrap_or(50).clamp(1, 100),
            message_type,
        };

        self.store
            .find_between(&requester.company_id, &party, query)
            .await
            .map_err(ChatError::Storage)
    }

    /// Unread messages addressed to the requester's company in one
    /// conversation.
    pub async fn unread_count(
        &self,
        requester: &SessionInfo,
        party: &CompanyId,
    ) -> Result<usize, ChatError> {
        self.store
            .unread_count(&requester.company_id, party, &requester.company_id)
            .await
            .map_err(ChatError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::ConnectionRegistry;
    use crate::ids::{SessionId, UserId};
    use crate::store::MemoryMessageStore;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryMessageStore>,
        dispatcher: MessageDispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryMessageStore::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), false));
        let dispatcher = MessageDispatcher::new(store.clone(), broadcaster, 4000);
        Fixture {
            registry,
            store,
            dispatcher,
        }
    }

    fn connect(
        fixture: &Fixture,
        id: &str,
        user: &str,
        company: &str,
    ) -> (SessionInfo, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = SessionInfo {
            id: SessionId::new(id),
            user_id: UserId::new(user),
            company_id: CompanyId::new(company),
            user_name: format!("{user} name"),
            company_name: format!("{company} name"),
        };
        assert!(fixture.registry.add_session(info.clone(), tx));
        fixture.registry.join_room(
            &info.id,
            &rooms::company_channel(&info.company_id),
        );
        (info, rx)
    }

    fn send_payload(to: &str, content: &str, temp_id: &str) -> SendMessagePayload {
        SendMessagePayload {
            party_id: Some(CompanyId::new(to)),
            content: Some(content.to_string()),
            message_type: Some("internal".to_string()),
            template_id: None,
            attachments: None,
            temp_id: Some(temp_id.to_string()),
            party_context_id: None,
            party_context_name: None,
        }
    }

    fn events_of(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn dispatch_persists_acks_and_fans_out() {
        let fx = fixture();
        let (sender, mut sender_rx) = connect(&fx, "s1", "u1", "c1");
        let (_peer, mut peer_rx) = connect(&fx, "s2", "u2", "c2");

        let message = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", "hello", "t1"))
            .await
            .unwrap();
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(message.temp_id.as_deref(), Some("t1"));

        // Exactly one persisted record.
        let page = fx
            .store
            .find_between(
                &CompanyId::new("c1"),
                &CompanyId::new("c2"),
                HistoryQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        // Sender sees the broadcast plus a unicast ack with the tempId.
        let sender_events = events_of(&mut sender_rx);
        let names: Vec<_> = sender_events.iter().map(|e| e.event).collect();
        assert!(names.contains(&EventName::NEW_MESSAGE));
        assert!(names.contains(&EventName::MESSAGE_SENT));
        let ack = sender_events
            .iter()
            .find(|e| e.event == EventName::MESSAGE_SENT)
            .unwrap();
        assert_eq!(ack.data["tempId"], "t1");
        assert_eq!(ack.data["status"], "sent");

        // Peer sees the broadcast only — the ack is never broadcast.
        let peer_events = events_of(&mut peer_rx);
        let names: Vec<_> = peer_events.iter().map(|e| e.event).collect();
        assert_eq!(names, vec![EventName::NEW_MESSAGE]);
        let incoming = &peer_events[0];
        assert_eq!(incoming.data["content"], "hello");
        assert_eq!(incoming.data["tempId"], "t1");
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_persistence() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let err = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", "   ", "t1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "empty_content");

        // No record was created.
        let page = fx
            .store
            .find_between(
                &CompanyId::new("c1"),
                &CompanyId::new("c2"),
                HistoryQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn missing_receiver_is_rejected() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let mut payload = send_payload("c2", "hello", "t1");
        payload.party_id = None;
        let err = fx.dispatcher.dispatch(&sender, payload).await.unwrap_err();
        assert_eq!(err.code(), "missing_company");
    }

    #[tokio::test]
    async fn same_company_send_is_rejected() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let err = fx
            .dispatcher
            .dispatch(&sender, send_payload("c1", "hello", "t1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "same_company");
    }

    #[tokio::test]
    async fn unknown_message_type_is_rejected() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let mut payload = send_payload("c2", "hello", "t1");
        payload.message_type = Some("telegraph".to_string());
        let err = fx.dispatcher.dispatch(&sender, payload).await.unwrap_err();
        assert_eq!(err.code(), "unknown_message_type");
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let long = "x".repeat(4001);
        let err = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", &long, "t1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "content_too_long");
    }

    #[tokio::test]
    async fn missing_type_defaults_to_internal() {
        let fx = fixture();
        let (sender, _rx) = connect(&fx, "s1", "u1", "c1");

        let mut payload = send_payload("c2", "hello", "t1");
        payload.message_type = None;
        let message = fx.dispatcher.dispatch(&sender, payload).await.unwrap();
        assert_eq!(message.message_type, MessageType::Internal);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_broadcasts_once() {
        let fx = fixture();
        let (sender, _sender_rx) = connect(&fx, "s1", "u1", "c1");
        let (reader, mut reader_rx) = connect(&fx, "s2", "u2", "c2");

        let message = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", "hello", "t1"))
            .await
            .unwrap();
        events_of(&mut reader_rx); // clear the new_message

        let room = rooms::chat_room_id(&sender.company_id, &reader.company_id);
        let payload = MarkReadPayload {
            message_id: Some(message.id.clone()),
            message_ids: None,
            chat_room_id: room,
        };
        let modified = fx.dispatcher.mark_read(&reader, payload).await.unwrap();
        assert_eq!(modified, 1);

        let names: Vec<_> = events_of(&mut reader_rx).iter().map(|e| e.event).collect();
        assert!(names.contains(&EventName::MESSAGE_READ));

        // Second pass: nothing transitions, nothing is broadcast.
        let payload = MarkReadPayload {
            message_id: Some(message.id.clone()),
            message_ids: None,
            chat_room_id: rooms::chat_room_id(&sender.company_id, &reader.company_id),
        };
        let modified = fx.dispatcher.mark_read(&reader, payload).await.unwrap();
        assert_eq!(modified, 0);
        assert!(events_of(&mut reader_rx).is_empty());
    }

    #[tokio::test]
    async fn mark_delivered_fans_out_and_notifies_sender() {
        let fx = fixture();
        let (sender, mut sender_rx) = connect(&fx, "s1", "u1", "c1");
        let (_receiver, mut receiver_rx) = connect(&fx, "s2", "u2", "c2");

        let message = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", "hello", "t1"))
            .await
            .unwrap();
        events_of(&mut sender_rx);
        events_of(&mut receiver_rx);

        assert!(fx.dispatcher.mark_delivered(&message.id).await.unwrap());

        let sender_names: Vec<_> =
            events_of(&mut sender_rx).iter().map(|e| e.event).collect();
        assert!(sender_names.contains(&EventName::MESSAGE_STATUS_UPDATED));
        assert!(sender_names.contains(&EventName::MESSAGE_DELIVERED));

        // A second ack is a no-op after the first... and after read.
        let ids = vec![message.id.clone()];
        fx.store.mark_many_read(&ids, &UserId::new("u2")).await.unwrap();
        assert!(!fx.dispatcher.mark_delivered(&message.id).await.unwrap());
    }

    #[tokio::test]
    async fn unread_count_reflects_reads() {
        let fx = fixture();
        let (sender, _rx1) = connect(&fx, "s1", "u1", "c1");
        let (reader, mut reader_rx) = connect(&fx, "s2", "u2", "c2");

        let message = fx
            .dispatcher
            .dispatch(&sender, send_payload("c2", "unread", "t1"))
            .await
            .unwrap();
        assert_eq!(
            fx.dispatcher
                .unread_count(&reader, &sender.company_id)
                .await
                .unwrap(),
            1
        );

        events_of(&mut reader_rx);
        let payload = MarkReadPayload {
            message_id: Some(message.id),
            message_ids: None,
            chat_room_id: rooms::chat_room_id(&sender.company_id, &reader.company_id),
        };
        fx.dispatcher.mark_read(&reader, payload).await.unwrap();
        assert_eq!(
            fx.dispatcher
                .unread_count(&reader, &sender.company_id)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn history_returns_newest_first_for_requester() {
        let fx = fixture();
        let (sender, _rx1) = connect(&fx, "s1", "u1", "c1");
        let (peer, _rx2) = connect(&fx, "s2", "u2", "c2");

        fx.dispatcher
            .dispatch(&sender, send_payload("c2", "first", "t1"))
            .await
            .unwrap();
        fx.dispatcher
            .dispatch(&peer, send_payload("c1", "second", "t2"))
            .await
            .unwrap();

        let payload = HistoryPayload {
            party_id: Some(CompanyId::new("c2")),
            page: None,
            limit: None,
            message_type: None,
        };
        let page = fx.dispatcher.history(&sender, payload).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.messages[0].content, "second");
    }
}

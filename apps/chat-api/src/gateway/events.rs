//! Wire-format events.
//!
//! Both directions are `{"event": <name>, "data": <payload>}` frames.
//! Payload fields are camelCase on the wire, matching the web client.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatError;
use crate::ids::{CompanyId, MessageId, RoomId, SessionId, UserId};
use crate::models::message::{Attachment, ChatMessage};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// An event received from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate(AuthenticatePayload),
    JoinCompanyChat(JoinChatPayload),
    LeaveCompanyChat(LeaveChatPayload),
    SendMessage(SendMessagePayload),
    MarkRead(MarkReadPayload),
    MessageDelivered(DeliveredPayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    GetChatHistory(HistoryPayload),
    Ping,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub token: Option<String>,
    /// Optional active-company selection when the account belongs to several.
    #[serde(default)]
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChatPayload {
    pub my_company_id: Option<CompanyId>,
    pub target_company_id: Option<CompanyId>,
    #[serde(default)]
    pub party_id: Option<String>,
    #[serde(default)]
    pub party_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveChatPayload {
    #[serde(default)]
    pub my_company_id: Option<CompanyId>,
    #[serde(default)]
    pub target_company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    /// The target company. The web client reuses its party field for this.
    pub party_id: Option<CompanyId>,
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    /// Correlation token for the client's optimistic UI.
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub party_context_id: Option<String>,
    #[serde(default)]
    pub party_context_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub message_ids: Option<Vec<MessageId>>,
    #[serde(default)]
    pub chat_room_id: Option<RoomId>,
}

impl MarkReadPayload {
    /// Collapse the single-id and multi-id forms into one list.
    pub fn ids(&self) -> Vec<MessageId> {
        let mut ids = self.message_ids.clone().unwrap_or_default();
        if let Some(id) = &self.message_id {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredPayload {
    pub message_id: MessageId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub party_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub party_id: Option<CompanyId>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub message_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Event names sent to clients.
pub struct EventName;

impl EventName {
    pub const CONNECTION_CONFIRMED: &'static str = "connection_confirmed";
    pub const AUTHENTICATED: &'static str = "authenticated";
    pub const AUTH_ERROR: &'static str = "auth_error";
    pub const USER_ONLINE: &'static str = "user_online";
    pub const USER_OFFLINE: &'static str = "user_offline";
    pub const COMPANY_CHAT_JOINED: &'static str = "company_chat_joined";
    pub const COMPANY_CHAT_ERROR: &'static str = "company_chat_error";
    pub const USER_JOINED_CHAT: &'static str = "user_joined_chat";
    pub const USER_LEFT_CHAT: &'static str = "user_left_chat";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const MESSAGE_SENT: &'static str = "message_sent";
    pub const MESSAGE_ERROR: &'static str = "message_error";
    pub const MESSAGE_READ: &'static str = "message_read";
    pub const MESSAGE_DELIVERED: &'static str = "message_delivered";
    pub const MESSAGE_STATUS_UPDATED: &'static str = "message_status_updated";
    pub const USER_TYPING: &'static str = "user_typing";
    pub const CHAT_HISTORY: &'static str = "chat_history";
    pub const CHAT_HISTORY_ERROR: &'static str = "chat_history_error";
    pub const PONG: &'static str = "pong";
}

/// An event pushed to a client.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub event: &'static str,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: &'static str, data: Value) -> Self {
        Self { event, data }
    }

    pub fn connection_confirmed() -> Self {
        Self::new(
            EventName::CONNECTION_CONFIRMED,
            serde_json::json!({ "timestamp": Utc::now() }),
        )
    }

    pub fn authenticated(
        session_id: &SessionId,
        user_id: &UserId,
        company_id: &CompanyId,
        user_name: &str,
        company_name: &str,
    ) -> Self {
        Self::new(
            EventName::AUTHENTICATED,
            serde_json::json!({
                "sessionId": session_id,
                "userId": user_id,
                "companyId": company_id,
                "userName": user_name,
                "companyName": company_name,
                "timestamp": Utc::now(),
            }),
        )
    }

    pub fn auth_error(error: &crate::error::AuthError) -> Self {
        Self::new(
            EventName::AUTH_ERROR,
            serde_json::json!({ "code": error.code(), "error": error.message() }),
        )
    }

    pub fn new_message(message: &ChatMessage) -> Self {
        Self::new(
            EventName::NEW_MESSAGE,
            serde_json::to_value(message).unwrap_or(Value::Null),
        )
    }

    /// Unicast acknowledgment to the sender, carrying the correlation token.
    pub fn message_sent(message: &ChatMessage) -> Self {
        Self::new(
            EventName::MESSAGE_SENT,
            serde_json::json!({
                "messageId": message.id,
                "tempId": message.temp_id,
                "status": message.status,
                "timestamp": message.sent_at.unwrap_or(message.created_at),
            }),
        )
    }

    pub fn message_error(temp_id: Option<&str>, error: &ChatError) -> Self {
        Self::new(
            EventName::MESSAGE_ERROR,
            serde_json::json!({
                "tempId": temp_id,
                "code": error.code(),
                "error": error.message(),
            }),
        )
    }

    pub fn company_chat_error(error: &ChatError) -> Self {
        Self::new(
            EventName::COMPANY_CHAT_ERROR,
            serde_json::json!({ "code": error.code(), "error": error.message() }),
        )
    }

    pub fn pong() -> Self {
        Self::new(EventName::PONG, serde_json::json!({ "timestamp": Utc::now() }))
    }
}

//! Chat message model and the delivery-status state machine.
//!
//! Status transitions are pure functions on the value; persisting the result
//! is the dispatcher's job, not the model's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CompanyId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Channel a message originated from or is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Whatsapp,
    Sms,
    Email,
    Internal,
    Notification,
    Website,
}

impl MessageType {
    /// Parse a client-supplied type string. `None` for anything outside the
    /// enumerated set — the dispatcher turns that into a validation error.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "whatsapp" => Some(MessageType::Whatsapp),
            "sms" => Some(MessageType::Sms),
            "email" => Some(MessageType::Email),
            "internal" => Some(MessageType::Internal),
            "notification" => Some(MessageType::Notification),
            "website" => Some(MessageType::Website),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Whatsapp => "whatsapp",
            MessageType::Sms => "sms",
            MessageType::Email => "email",
            MessageType::Internal => "internal",
            MessageType::Notification => "notification",
            MessageType::Website => "website",
        }
    }
}

/// Delivery state machine: `sending → sent → delivered → read`, with `failed`
/// as an alternate terminal reachable from `sending` or `sent` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Sending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            // Terminal, but ordered outside the forward chain.
            DeliveryStatus::Failed => 4,
        }
    }

    /// Compute the next status, or `None` if the move would regress or leave
    /// a terminal state. A `delivered` event arriving after `read` is a no-op.
    pub fn transition(self, next: DeliveryStatus) -> Option<DeliveryStatus> {
        match next {
            DeliveryStatus::Failed => match self {
                DeliveryStatus::Sending | DeliveryStatus::Sent => Some(DeliveryStatus::Failed),
                _ => None,
            },
            _ => {
                if matches!(self, DeliveryStatus::Failed) {
                    return None;
                }
                (next.rank() > self.rank()).then_some(next)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Which side of the conversation produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Conversation shape. Only company-to-company is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    #[serde(rename = "company-to-company")]
    CompanyToCompany,
}

// ---------------------------------------------------------------------------
// Supporting records
// ---------------------------------------------------------------------------

/// Originating-party context for messages bridging a party conversation into
/// a company-to-company one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// File attached to a message. Stored verbatim; the gateway does not host
/// the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// One user's read acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// A persisted company-to-company chat message. Field names serialize in the
/// client wire shape (camelCase).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_company_id: CompanyId,
    pub receiver_company_id: CompanyId,
    pub sender_user_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub direction: Direction,
    pub chat_type: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<PartyRef>,
    /// Client correlation token for reconciling optimistic UI state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_by: Vec<ReadReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// True when the message belongs to the unordered conversation pair
    /// `{a, b}`, regardless of which side sent it.
    pub fn involves(&self, a: &CompanyId, b: &CompanyId) -> bool {
        (self.sender_company_id == *a && self.receiver_company_id == *b)
            || (self.sender_company_id == *b && self.receiver_company_id == *a)
    }

    /// Apply a status transition, stamping the matching timestamp. Returns
    /// the (possibly unchanged) message and whether anything moved.
    pub fn apply_status(mut self, next: DeliveryStatus, at: DateTime<Utc>) -> (Self, bool) {
        let Some(new_status) = self.status.transition(next) else {
            return (self, false);
        };
        self.status = new_status;
        match new_status {
            DeliveryStatus::Sent => self.sent_at = Some(at),
            DeliveryStatus::Delivered => self.delivered_at = Some(at),
            DeliveryStatus::Read => self.read_at = Some(at),
            DeliveryStatus::Failed => self.failed_at = Some(at),
            DeliveryStatus::Sending => {}
        }
        (self, true)
    }

    /// Record a read receipt for `reader`. Idempotent: a second read by the
    /// same user changes nothing and keeps the original `read_at`.
    pub fn mark_read_by(mut self, reader: &UserId, at: DateTime<Utc>) -> (Self, bool) {
        if self.read_by.iter().any(|r| r.user_id == *reader) {
            return (self, false);
        }
        self.read_by.push(ReadReceipt {
            user_id: reader.clone(),
            read_at: at,
        });
        let (updated, _) = self.apply_status(DeliveryStatus::Read, at);
        (updated, true)
    }
}

/// Fields the dispatcher supplies when persisting a new message. The store
/// assigns the id and server timestamps.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_company_id: CompanyId,
    pub receiver_company_id: CompanyId,
    pub sender_user_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub party: Option<PartyRef>,
    pub temp_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

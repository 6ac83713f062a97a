//! Abstraction over the chat message store.
//!
//! The gateway consumes persistence only through this trait; the real store
//! lives in the business-management backend. The in-memory implementation
//! backs tests and single-process deployments.

pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ids::{CompanyId, MessageId, UserId};
use crate::models::message::{ChatMessage, DeliveryStatus, MessageType, NewMessage};

pub use memory::MemoryMessageStore;

/// Pagination for history queries. Pages are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct HistoryQuery {
    pub page: u32,
    pub limit: u32,
    pub message_type: Option<MessageType>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            message_type: None,
        }
    }
}

/// One page of history, newest first, with total-count metadata.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and server timestamps.
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, StorageError>;

    /// Apply a status transition. Returns the updated message, or `None` when
    /// the message is unknown or the transition would regress (no-op).
    async fn update_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<Option<ChatMessage>, StorageError>;

    /// All messages between the unordered pair `{a, b}`, newest first.
    async fn find_between(
        &self,
        a: &CompanyId,
        b: &CompanyId,
        query: HistoryQuery,
    ) -> Result<MessagePage, StorageError>;

    /// Mark the given messages read by `reader`. Already-read messages are
    /// left unchanged. Returns the number actually transitioned.
    async fn mark_many_read(
        &self,
        ids: &[MessageId],
        reader: &UserId,
    ) -> Result<usize, StorageError>;

    /// Messages addressed to `reader_company` in the `{a, b}` conversation
    /// not yet read.
    async fn unread_count(
        &self,
        a: &CompanyId,
        b: &CompanyId,
        reader_company: &CompanyId,
    ) -> Result<usize, StorageError>;
}

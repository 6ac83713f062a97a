//! In-memory message store (for tests and single-process deployments).

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use tradelink_common::id::{prefix, prefixed_ulid};

use crate::error::StorageError;
use crate::ids::{CompanyId, MessageId, UserId};
use crate::models::message::{ChatMessage, DeliveryStatus, Direction, NewMessage};

use super::{HistoryQuery, MessagePage, MessageStore};

pub struct MemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, StorageError> {
        let now = Utc::now();
        let record = ChatMessage {
            id: MessageId::new(prefixed_ulid(prefix::MESSAGE)),
            sender_company_id: message.sender_company_id,
            receiver_company_id: message.receiver_company_id,
            sender_user_id: message.sender_user_id,
            sender_name: message.sender_name,
            content: message.content,
            message_type: message.message_type,
            status: message.status,
            direction: Direction::Outbound,
            chat_type: crate::models::message::ChatType::CompanyToCompany,
            party: message.party,
            temp_id: message.temp_id,
            attachments: message.attachments,
            read_by: Vec::new(),
            sent_at: (message.status == DeliveryStatus::Sent).then_some(now),
            delivered_at: None,
            read_at: None,
            failed_at: None,
            created_at: now,
        };
        self.messages.lock().push(record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<Option<ChatMessage>, StorageError> {
        let mut messages = self.messages.lock();
        let Some(slot) = messages.iter_mut().find(|m| m.id == *id) else {
            return Ok(None);
        };
        let (updated, changed) = slot.clone().apply_status(status, Utc::now());
        if !changed {
            return Ok(None);
        }
        *slot = updated.clone();
        Ok(Some(updated))
    }

    async fn find_between(
        &self,
        a: &CompanyId,
        b: &CompanyId,
        query: HistoryQuery,
    ) -> Result<MessagePage, StorageError> {
        let messages = self.messages.lock();
        let mut matching: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.involves(a, b))
            .filter(|m| query.message_type.map_or(true, |t| m.message_type == t))
            .cloned()
            .collect();
        // Newest first.
        matching.sort_by(|x, y| y.created_at.cmp(&x.created_at));

        let total = matching.len();
        let limit = query.limit.max(1);
        let page = query.page.max(1);
        let total_pages = (total as u32).div_ceil(limit);
        let start = ((page - 1) * limit) as usize;
        let page_messages: Vec<ChatMessage> = matching
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect();

        Ok(MessagePage {
            messages: page_messages,
            total,
            page,
            limit,
            total_pages,
        })
    }

    async fn mark_many_read(
        &self,
        ids: &[MessageId],
        reader: &UserId,
    ) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut messages = self.messages.lock();
        let mut modified = 0;
        for slot in messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            let (updated, changed) = slot.clone().mark_read_by(reader, now);
            if changed {
                *slot = updated;
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn unread_count(
        &self,
        a: &CompanyId,
        b: &CompanyId,
        reader_company: &CompanyId,
    ) -> Result<usize, StorageError> {
        let messages = self.messages.lock();
        Ok(messages
            .iter()
            .filter(|m| m.involves(a, b))
            .filter(|m| m.receiver_company_id == *reader_company)
            .filter(|m| m.status != DeliveryStatus::Read && m.status != DeliveryStatus::Failed)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageType;

    fn new_message(from: &str, to: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_company_id: CompanyId::new(from),
            receiver_company_id: CompanyId::new(to),
            sender_user_id: UserId::new("u_1"),
            sender_name: "Asha".to_string(),
            content: content.to_string(),
            message_type: MessageType::Internal,
            status: DeliveryStatus::Sent,
            party: None,
            temp_id: None,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let store = MemoryMessageStore::new();
        let msg = store.create(new_message("co_a", "co_b", "hi")).await.unwrap();
        assert!(msg.id.as_str().starts_with("msg_"));
        assert_eq!(msg.status, DeliveryStatus::Sent);
        assert!(msg.sent_at.is_some());
    }

    #[tokio::test]
    async fn find_between_is_order_independent_and_newest_first() {
        let store = MemoryMessageStore::new();
        store.create(new_message("co_a", "co_b", "first")).await.unwrap();
        store.create(new_message("co_b", "co_a", "second")).await.unwrap();
        store.create(new_message("co_a", "co_c", "other pair")).await.unwrap();

        let a = CompanyId::new("co_a");
        let b = CompanyId::new("co_b");

        let page = store
            .find_between(&a, &b, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.messages[0].content, "second");
        assert_eq!(page.messages[1].content, "first");

        // Same result with the pair flipped.
        let flipped = store
            .find_between(&b, &a, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(flipped.total, 2);
    }

    #[tokio::test]
    async fn find_between_paginates_with_totals() {
        let store = MemoryMessageStore::new();
        for i in 0..5 {
            store
                .create(new_message("co_a", "co_b", &format!("m{i}")))
                .await
                .unwrap();
        }

        let query = HistoryQuery {
            page: 2,
            limit: 2,
            message_type: None,
        };
        let page = store
            .find_between(&CompanyId::new("co_a"), &CompanyId::new("co_b"), query)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.messages.len(), 2);
    }

    #[tokio::test]
    async fn find_between_filters_by_type() {
        let store = MemoryMessageStore::new();
        let mut email = new_message("co_a", "co_b", "email one");
        email.message_type = MessageType::Email;
        store.create(email).await.unwrap();
        store.create(new_message("co_a", "co_b", "internal one")).await.unwrap();

        let query = HistoryQuery {
            message_type: Some(MessageType::Email),
            ..HistoryQuery::default()
        };
        let page = store
            .find_between(&CompanyId::new("co_a"), &CompanyId::new("co_b"), query)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].content, "email one");
    }

    #[tokio::test]
    async fn update_status_refuses_regression() {
        let store = MemoryMessageStore::new();
        let msg = store.create(new_message("co_a", "co_b", "hi")).await.unwrap();

        let updated = store
            .update_status(&msg.id, DeliveryStatus::Read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, DeliveryStatus::Read);

        // Late delivered event: no-op.
        let refused = store
            .update_status(&msg.id, DeliveryStatus::Delivered)
            .await
            .unwrap();
        assert!(refused.is_none());
    }

    #[tokio::test]
    async fn mark_many_read_counts_only_transitions() {
        let store = MemoryMessageStore::new();
        let m1 = store.create(new_message("co_a", "co_b", "one")).await.unwrap();
        let m2 = store.create(new_message("co_a", "co_b", "two")).await.unwrap();
        let reader = UserId::new("u_2");

        let ids = vec![m1.id.clone(), m2.id.clone()];
        assert_eq!(store.mark_many_read(&ids, &reader).await.unwrap(), 2);
        // Second call is idempotent.
        assert_eq!(store.mark_many_read(&ids, &reader).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unread_count_is_scoped_to_receiver_company() {
        let store = MemoryMessageStore::new();
        store.create(new_message("co_a", "co_b", "to b")).await.unwrap();
        store.create(new_message("co_a", "co_b", "to b too")).await.unwrap();
        store.create(new_message("co_b", "co_a", "to a")).await.unwrap();

        let a = CompanyId::new("co_a");
        let b = CompanyId::new("co_b");
        assert_eq!(store.unread_count(&a, &b, &b).await.unwrap(), 2);
        assert_eq!(store.unread_count(&a, &b, &a).await.unwrap(), 1);
    }
}

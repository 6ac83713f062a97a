//! Real-time push surface for the notification service.
//!
//! The notification pipeline (email/SMS/WhatsApp templating) lives in the
//! business backend; when it wants an in-app alert it hands us an event name
//! and an opaque payload. We neither know nor care what the payload means.

use std::sync::Arc;

use serde_json::Value;

use crate::ids::{CompanyId, UserId};

use super::broadcaster::Broadcaster;
use super::events::ServerEvent;
use super::registry::ConnectionRegistry;

pub struct RealtimeNotifier {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
}

impl RealtimeNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Push to every live session of one user. `false` when the user is
    /// offline here.
    pub fn send_to_user(&self, user: &UserId, event: &'static str, payload: Value) -> bool {
        self.broadcaster
            .to_user(user, &ServerEvent::new(event, payload))
    }

    /// Push to every live session of one company.
    pub fn send_to_company(
        &self,
        company: &CompanyId,
        event: &'static str,
        payload: Value,
    ) -> bool {
        self.broadcaster
            .to_company(company, &ServerEvent::new(event, payload))
    }

    pub fn is_user_online(&self, user: &UserId) -> bool {
        self.registry.is_user_online(user)
    }

    /// Distinct online users of a company, with display names.
    pub fn online_users_for_company(&self, company: &CompanyId) -> Vec<(UserId, String)> {
        self.registry.online_users_for_company(company)
    }
}

//! Room keying.
//!
//! Every broadcast group id is minted here, from one of three reserved
//! prefixes. The two-party chat room id sorts the company pair so both
//! participants derive the identical id no matter who initiates.
//!
//! Company and user ids must not contain `_`; account-service ids never do.

use crate::ids::{CompanyId, RoomId, UserId};

pub const CHAT_ROOM_PREFIX: &str = "company_chat_";
pub const COMPANY_CHANNEL_PREFIX: &str = "company_";
pub const USER_CHANNEL_PREFIX: &str = "user_";

/// Canonical id of the two-party chat room for `{a, b}`. `None` when either
/// id is missing.
pub fn chat_room_id(a: &CompanyId, b: &CompanyId) -> Option<RoomId> {
    if a.is_blank() || b.is_blank() {
        return None;
    }
    let (lo, hi) = if a.as_str() <= b.as_str() {
        (a, b)
    } else {
        (b, a)
    };
    Some(RoomId::new(format!("{CHAT_ROOM_PREFIX}{lo}_{hi}")))
}

/// Channel carrying everything addressed to one company's sessions.
pub fn company_channel(company: &CompanyId) -> RoomId {
    RoomId::new(format!("{COMPANY_CHANNEL_PREFIX}{company}"))
}

/// Channel carrying everything addressed to one user's sessions.
pub fn user_channel(user: &UserId) -> RoomId {
    RoomId::new(format!("{USER_CHANNEL_PREFIX}{user}"))
}

/// Recover the company pair from a chat-room id minted by [`chat_room_id`].
/// `None` for channel ids or anything else.
pub fn parse_chat_room(room: &RoomId) -> Option<(CompanyId, CompanyId)> {
    let rest = room.as_str().strip_prefix(CHAT_ROOM_PREFIX)?;
    let (lo, hi) = rest.split_once('_')?;
    if lo.is_empty() || hi.is_empty() {
        return None;
    }
    Some((CompanyId::new(lo), CompanyId::new(hi)))
}

//! Identifier newtypes.
//!
//! Session, user, company, room, and message ids are all strings on the wire.
//! Wrapping each family in its own type keeps them from being swapped at a
//! call site (a room id is never a session id).

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the id is missing in any practical sense (empty or
            /// whitespace-only). Payloads arrive from untrusted clients.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Transport-assigned id of one live connection (`ses_` prefixed ULID).
    SessionId
);
string_id!(
    /// Account-service user id.
    UserId
);
string_id!(
    /// Account-service company id.
    CompanyId
);
string_id!(
    /// Canonical id of a broadcast group. Only minted by `gateway::rooms`.
    RoomId
);
string_id!(
    /// Persisted chat-message id (`msg_` prefixed ULID).
    MessageId
);

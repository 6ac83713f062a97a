//! Error taxonomy for the chat gateway.
//!
//! Every error here is scoped to a single session: auth failures kill the
//! connection attempt, validation and storage failures are reported back to
//! the offending session only, and transport failures are logged and skipped
//! so one dead socket never aborts a fan-out.

use std::fmt;

use crate::ids::SessionId;

// ---------------------------------------------------------------------------
// AuthError — fatal to the connection attempt
// ---------------------------------------------------------------------------

/// Why an `authenticate` attempt was rejected. The connection is never
/// registered when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    ExpiredToken,
    NoActiveCompany,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::NoActiveCompany => "no_active_company",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Authentication token is required",
            AuthError::InvalidToken => "Authentication token is invalid",
            AuthError::ExpiredToken => "Authentication token has expired",
            AuthError::NoActiveCompany => "User has no active company",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ---------------------------------------------------------------------------
// ValidationError — reported to the originating session, connection lives on
// ---------------------------------------------------------------------------

/// A malformed join/send/history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_company(field: &str) -> Self {
        Self::new("missing_company", format!("{field} is required"))
    }

    pub fn same_company() -> Self {
        Self::new("same_company", "Cannot open a chat with your own company")
    }

    pub fn empty_content() -> Self {
        Self::new("empty_content", "Message content cannot be empty")
    }

    pub fn content_too_long(max: usize) -> Self {
        Self::new(
            "content_too_long",
            format!("Message content must be {max} characters or fewer"),
        )
    }

    pub fn unknown_message_type(got: &str) -> Self {
        Self::new("unknown_message_type", format!("Unknown message type: {got}"))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ---------------------------------------------------------------------------
// StorageError — persistence call rejected
// ---------------------------------------------------------------------------

/// The message store rejected a call. Carried back to the sender (with its
/// correlation token) so the client can mark its optimistic message failed.
#[derive(Debug, Clone)]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StorageError {}

// ---------------------------------------------------------------------------
// TransportError — one push to one session failed
// ---------------------------------------------------------------------------

/// A single outbound push failed (the session's channel was closed under us).
/// Logged by the broadcaster and skipped; never propagated.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub session_id: SessionId,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push to session {} failed", self.session_id)
    }
}

// ---------------------------------------------------------------------------
// ChatError — what dispatcher/gateway operations surface
// ---------------------------------------------------------------------------

/// Typed error surfaced to exactly one session, never to a broadcast group.
#[derive(Debug, Clone)]
pub enum ChatError {
    Auth(AuthError),
    Validation(ValidationError),
    Storage(StorageError),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Auth(e) => e.code(),
            ChatError::Validation(e) => e.code,
            ChatError::Storage(_) => "storage_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ChatError::Auth(e) => e.message().to_string(),
            ChatError::Validation(e) => e.message.clone(),
            ChatError::Storage(e) => e.message.clone(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<AuthError> for ChatError {
    fn from(e: AuthError) -> Self {
        ChatError::Auth(e)
    }
}

impl From<ValidationError> for ChatError {
    fn from(e: ValidationError) -> Self {
        ChatError::Validation(e)
    }
}

impl From<StorageError> for ChatError {
    fn from(e: StorageError) -> Self {
        ChatError::Storage(e)
    }
}

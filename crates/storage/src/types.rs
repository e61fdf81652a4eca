use super::ids::{SessionId, TurnId};

/// Author name recorded on turns produced from a failed model call.
pub const SYSTEM_AUTHOR: &str = "System";

/// Storage-local turn role, decoupled from provider message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnRole {
    User,
    Assistant,
    SystemError,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::SystemError => "system_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// One persisted message of a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub id: TurnId,
    pub session_id: SessionId,
    pub role: TurnRole,
    pub author: String,
    pub created_at_unix_millis: u64,
    pub message: String,
    pub payload_json: Option<String>,
    pub stack_trace: Option<String>,
    pub response_time_ms: Option<u64>,
    pub token_usage: Option<TokenCounts>,
    pub deleted: bool,
}

/// Insert payload; id, timestamp and the deleted flag are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatTurn {
    pub session_id: SessionId,
    pub role: TurnRole,
    pub author: String,
    pub message: String,
    pub payload_json: Option<String>,
    pub stack_trace: Option<String>,
    pub response_time_ms: Option<u64>,
    pub token_usage: Option<TokenCounts>,
}

impl NewChatTurn {
    pub fn user(
        session_id: SessionId,
        author: impl Into<String>,
        message: impl Into<String>,
        payload_json: Option<String>,
    ) -> Self {
        Self {
            session_id,
            role: TurnRole::User,
            author: author.into(),
            message: message.into(),
            payload_json,
            stack_trace: None,
            response_time_ms: None,
            token_usage: None,
        }
    }

    pub fn assistant(
        session_id: SessionId,
        author: impl Into<String>,
        message: impl Into<String>,
        payload_json: Option<String>,
        response_time_ms: u64,
        token_usage: TokenCounts,
    ) -> Self {
        Self {
            session_id,
            role: TurnRole::Assistant,
            author: author.into(),
            message: message.into(),
            payload_json,
            stack_trace: None,
            response_time_ms: Some(response_time_ms),
            token_usage: Some(token_usage),
        }
    }

    pub fn system_error(
        session_id: SessionId,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            role: TurnRole::SystemError,
            author: SYSTEM_AUTHOR.to_string(),
            message: message.into(),
            payload_json: None,
            stack_trace: Some(stack_trace.into()),
            response_time_ms: None,
            token_usage: None,
        }
    }
}

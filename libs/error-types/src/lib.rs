use serde::{Deserialize, Serialize};

/// Unified HTTP error body returned by every REST route of the delivery service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short HTTP reason phrase ("Bad Request", "Forbidden", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category used by clients for routing:
    /// - "rejection_error" - the action is not allowed (blocked pair, inactive conversation, ...)
    /// - "validation_error" - malformed input
    /// - "authentication_error" - missing or invalid credential
    /// - "not_found_error" - resource does not exist
    /// - "server_error" - internal failure
    /// - "service_unavailable_error" - a backing store is unreachable
    pub error_type: String,

    /// Stable code for client-side localization, e.g. "CONVERSATION_BLOCKED"
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Payload of the realtime `error` event pushed to a single connection.
///
/// Only the initiating connection ever sees this event; it carries the stable
/// code plus a message the client can show as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub localized_message: String,
}

impl ErrorEvent {
    pub fn new(code: &str, localized_message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            localized_message: localized_message.into(),
        }
    }

    /// Serialize as a complete realtime frame (`{"type":"error", ...}`).
    pub fn to_frame(&self) -> String {
        serde_json::json!({
            "type": "error",
            "code": self.code,
            "localized_message": self.localized_message,
        })
        .to_string()
    }
}

/// Stable error codes surfaced to clients
pub mod error_codes {
    // Authentication
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";

    // Delivery rejections
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const CONVERSATION_BLOCKED: &str = "CONVERSATION_BLOCKED";
    pub const CONVERSATION_INACTIVE: &str = "CONVERSATION_INACTIVE";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const SELF_ADDRESSED: &str = "SELF_ADDRESSED";
    pub const MESSAGE_EMPTY: &str = "MESSAGE_EMPTY";
    pub const MESSAGE_TOO_LONG: &str = "MESSAGE_TOO_LONG";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const INVALID_COMMAND: &str = "INVALID_COMMAND";

    // Infrastructure
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
}

/// Standard error categories
pub mod error_types {
    pub const REJECTION_ERROR: &str = "rejection_error";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use error_types::{error_codes, error_types as categories, ErrorEvent, ErrorResponse};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// How a failure is handled by the delivery core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Policy disallows the action; nothing is persisted, the caller is told.
    Rejection,
    /// Broadcast-side failure; logged and swallowed.
    BestEffort,
    /// Store unreachable; retried by the next sweep or surfaced as a generic failure.
    Transient,
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("credential missing")]
    MissingCredential,

    #[error("not found")]
    NotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("conversation is blocked")]
    ConversationBlocked,

    #[error("conversation is not active")]
    ConversationInactive,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("cannot address a message to yourself")]
    SelfAddressed,

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::ServiceUnavailable(e.to_string())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ConversationBlocked
            | AppError::ConversationInactive
            | AppError::NotParticipant
            | AppError::SelfAddressed
            | AppError::EmptyContent
            | AppError::ContentTooLong { .. }
            | AppError::BadRequest(_)
            | AppError::Unauthorized
            | AppError::MissingCredential
            | AppError::NotFound
            | AppError::MessageNotFound => ErrorKind::Rejection,
            AppError::Broadcast(_) => ErrorKind::BestEffort,
            AppError::Database(_)
            | AppError::ServiceUnavailable(_)
            | AppError::Internal
            | AppError::Config(_)
            | AppError::StartServer(_) => ErrorKind::Transient,
        }
    }

    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::ServiceUnavailable(_) | AppError::Internal
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::EmptyContent | AppError::ContentTooLong { .. } => {
                400
            }
            AppError::Unauthorized | AppError::MissingCredential => 401,
            AppError::ConversationBlocked
            | AppError::NotParticipant
            | AppError::SelfAddressed => 403,
            AppError::NotFound | AppError::MessageNotFound => 404,
            AppError::ConversationInactive => 409,
            AppError::ServiceUnavailable(_) => 503,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::StartServer(_) => error_codes::CONFIGURATION_ERROR,
            AppError::BadRequest(_) => error_codes::INVALID_COMMAND,
            AppError::Unauthorized => error_codes::TOKEN_INVALID,
            AppError::MissingCredential => error_codes::TOKEN_MISSING,
            AppError::NotFound => error_codes::CONVERSATION_NOT_FOUND,
            AppError::MessageNotFound => error_codes::MESSAGE_NOT_FOUND,
            AppError::ConversationBlocked => error_codes::CONVERSATION_BLOCKED,
            AppError::ConversationInactive => error_codes::CONVERSATION_INACTIVE,
            AppError::NotParticipant => error_codes::NOT_CONVERSATION_MEMBER,
            AppError::SelfAddressed => error_codes::SELF_ADDRESSED,
            AppError::EmptyContent => error_codes::MESSAGE_EMPTY,
            AppError::ContentTooLong { .. } => error_codes::MESSAGE_TOO_LONG,
            AppError::Database(_) => error_codes::DATABASE_ERROR,
            AppError::ServiceUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            AppError::Broadcast(_) | AppError::Internal => error_codes::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing text for the realtime `error` event.
    ///
    /// Infrastructure failures collapse into one generic sentence so store
    /// details never reach a client.
    pub fn localized_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Your session has expired. Please sign in again.".into(),
            AppError::MissingCredential => "Please sign in to continue.".into(),
            AppError::BadRequest(_) => "That request could not be understood.".into(),
            AppError::NotFound => "This conversation no longer exists.".into(),
            AppError::MessageNotFound => "That message could not be found.".into(),
            AppError::ConversationBlocked => "You can't send messages in this conversation.".into(),
            AppError::ConversationInactive => "This conversation is no longer active.".into(),
            AppError::NotParticipant => "You are not part of this conversation.".into(),
            AppError::SelfAddressed => "You can't send a message to yourself.".into(),
            AppError::EmptyContent => "Messages can't be empty.".into(),
            AppError::ContentTooLong { max } => {
                format!("Messages can be at most {max} characters long.")
            }
            _ => "Something went wrong. Please try again.".into(),
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent::new(self.error_code(), self.localized_message())
    }

    fn error_category(&self) -> &'static str {
        match self {
            AppError::Unauthorized | AppError::MissingCredential => {
                categories::AUTHENTICATION_ERROR
            }
            AppError::BadRequest(_) | AppError::EmptyContent | AppError::ContentTooLong { .. } => {
                categories::VALIDATION_ERROR
            }
            AppError::NotFound | AppError::MessageNotFound => categories::NOT_FOUND_ERROR,
            AppError::ServiceUnavailable(_) => categories::SERVICE_UNAVAILABLE_ERROR,
            _ if self.kind() == ErrorKind::Rejection => categories::REJECTION_ERROR,
            _ => categories::SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ErrorResponse::new(
            status.canonical_reason().unwrap_or("Error"),
            &self.localized_message(),
            status.as_u16(),
            self.error_category(),
            self.error_code(),
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(self.to_response())
    }
}

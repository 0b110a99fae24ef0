use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use roster::{RosterError, SessionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Page not found")]
    PageNotFound,

    #[error("Page belongs to another user")]
    Forbidden,

    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] SessionError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::PageNotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Roster(error) => match error {
                RosterError::SlotOutOfRange(_) | RosterError::UnknownField(_) => {
                    StatusCode::BAD_REQUEST
                }
                RosterError::NotLoaded
                | RosterError::ResetNotConfirmed(_)
                | RosterError::RosterResetNotConfirmed
                | RosterError::StaleEvent { .. } => StatusCode::CONFLICT,
                RosterError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::Config(_) | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

use thiserror::Error;

use crate::message::Frame;

/// Process-wide failure taxonomy for the gateway.
///
/// Handlers return these from their entry points; the subscription wrapper
/// converts them into the client-facing error frame through the [`Frame`]
/// translation below, so one failing command never takes down a connection.
/// Auth failures at admission close the socket instead and never reach the
/// frame path.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("protocol failure: {0}")]
    Protocol(String),

    #[error("semantic failure: {0}")]
    Semantic(String),

    #[error("resource failure: {0}")]
    Resource(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Client-facing text for the error frame. Internal failures stay
    /// generic on the wire; their detail goes to the log only.
    fn user_message(&self) -> &str {
        match self {
            AppError::Auth(msg)
            | AppError::Protocol(msg)
            | AppError::Semantic(msg)
            | AppError::Resource(msg) => msg,
            AppError::Internal(_) => "Error processing your message",
        }
    }
}

/// The single translation point from a handler failure to the error frame
/// sent to the client.
impl From<&AppError> for Frame {
    fn from(err: &AppError) -> Self {
        Frame::error(err.user_message())
    }
}

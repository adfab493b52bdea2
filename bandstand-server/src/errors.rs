use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bandstand_session::{InputError, RoomError};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Room(#[from] RoomError),
    #[error("{0}")]
    Input(#[from] InputError),
    #[error("Too many requests")]
    RateLimited,
    #[error("Missing query parameter: {0}")]
    MissingParameter(&'static str),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Room(RoomError::UnknownRoom) => StatusCode::NOT_FOUND,
            Self::Room(RoomError::RoomsFull) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Room(_) => StatusCode::BAD_REQUEST,
            Self::Input(InputError::NotFound) => StatusCode::NOT_FOUND,
            Self::Input(InputError::MissingApiKey) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Input(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

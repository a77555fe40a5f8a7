use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::counts::CountError;
use crate::application::downloads::DownloadError;
use crate::application::error::ErrorReport;
use crate::application::favorites::FavoriteError;
use crate::application::flags::FlagError;
use crate::application::likes::LikeError;
use crate::application::repos::RepoError;
use crate::cache::StoreError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const ALREADY_LIKED: &str = "already_liked";
    pub const NOT_LIKED: &str = "not_liked";
    pub const ALREADY_FAVORITE: &str = "already_favorite";
    pub const NOT_FAVORITE: &str = "not_favorite";
    pub const UNKNOWN_RESOURCE: &str = "unknown_resource";
    pub const UNKNOWN_FIELD: &str = "unknown_field";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const CACHE: &str = "cache_unavailable";
    pub const TIMEOUT: &str = "timeout";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "x-user-id header required",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn timeout() -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            codes::TIMEOUT,
            "Request timed out",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { constraint } => Self::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "Duplicate record",
                Some(constraint),
            ),
            RepoError::NotFound => Self::not_found("Resource not found"),
            RepoError::InvalidInput { message } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid input",
                Some(message),
            ),
            RepoError::Integrity { message } => Self::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "Integrity constraint violated",
                Some(message),
            ),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                None,
            ),
            RepoError::Persistence(message) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                Some(message),
            ),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::CACHE,
            "Counter store unavailable",
            Some(err.to_string()),
        )
    }
}

impl From<FlagError> for ApiError {
    fn from(err: FlagError) -> Self {
        match err {
            FlagError::Store(err) => err.into(),
            FlagError::Repo(err) => err.into(),
        }
    }
}

impl From<CountError> for ApiError {
    fn from(err: CountError) -> Self {
        match err {
            CountError::NotFound { .. } => Self::not_found("Resource not found"),
            CountError::Domain(err) => Self::bad_request("Invalid counter", Some(err.to_string())),
            CountError::Store(err) => err.into(),
            CountError::Repo(err) => err.into(),
        }
    }
}

impl From<LikeError> for ApiError {
    fn from(err: LikeError) -> Self {
        match err {
            LikeError::AlreadyLiked { .. } => Self::new(
                StatusCode::CONFLICT,
                codes::ALREADY_LIKED,
                "Mod already liked",
                None,
            ),
            LikeError::NotLiked { .. } => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_LIKED,
                "Mod not liked",
                None,
            ),
            LikeError::ModNotFound { .. } => Self::not_found("Mod not found"),
            LikeError::Flag(err) => err.into(),
            LikeError::Repo(err) => err.into(),
            LikeError::Timeout => Self::timeout(),
        }
    }
}

impl From<FavoriteError> for ApiError {
    fn from(err: FavoriteError) -> Self {
        match err {
            FavoriteError::AlreadyFavorite { .. } => Self::new(
                StatusCode::CONFLICT,
                codes::ALREADY_FAVORITE,
                "Mod already in favorites",
                None,
            ),
            FavoriteError::NotFavorite { .. } => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FAVORITE,
                "Mod not in favorites",
                None,
            ),
            FavoriteError::ModNotFound { .. } => Self::not_found("Mod not found"),
            FavoriteError::Flag(err) => err.into(),
            FavoriteError::Repo(err) => err.into(),
            FavoriteError::Timeout => Self::timeout(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Count(err) => err.into(),
            DownloadError::Timeout => Self::timeout(),
        }
    }
}

use std::str::FromStr;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::application::error::ErrorReport;
use crate::domain::types::{CounterColumn, ResourceId, ResourceType};

use super::error::{ApiError, codes};
use super::middleware::UserContext;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct LikeStatusResponse {
    pub mod_id: ResourceId,
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct FavoriteStatusResponse {
    pub mod_id: ResourceId,
    pub favorite: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub resource: ResourceType,
    pub id: ResourceId,
    pub field: CounterColumn,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub mod_id: ResourceId,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteQuery {
    pub mod_id: ResourceId,
}

pub async fn health(State(state): State<AppState>) -> Response {
    if let Err(err) = state.store.ping().await {
        return unavailable("infra::http::health::store", &err);
    }
    if let Err(err) = state.db.ping().await {
        return unavailable("infra::http::health::db", &err);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn unavailable(source: &'static str, err: &dyn std::error::Error) -> Response {
    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    ErrorReport::from_error(source, StatusCode::SERVICE_UNAVAILABLE, err).attach(&mut response);
    response
}

pub async fn like_mod(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(mod_id): Path<ResourceId>,
) -> Result<impl IntoResponse, ApiError> {
    state.likes.like_mod(user.user_id, mod_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(LikeStatusResponse {
            mod_id,
            liked: true,
        }),
    ))
}

pub async fn unlike_mod(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(mod_id): Path<ResourceId>,
) -> Result<Json<LikeStatusResponse>, ApiError> {
    state.likes.unlike_mod(user.user_id, mod_id).await?;
    Ok(Json(LikeStatusResponse {
        mod_id,
        liked: false,
    }))
}

pub async fn like_status(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(mod_id): Path<ResourceId>,
) -> Result<Json<LikeStatusResponse>, ApiError> {
    let liked = state.likes.like_status(user.user_id, mod_id).await?;
    Ok(Json(LikeStatusResponse { mod_id, liked }))
}

pub async fn create_favorite(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(payload): Json<FavoriteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .favorites
        .create_favorite(user.user_id, payload.mod_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(FavoriteStatusResponse {
            mod_id: payload.mod_id,
            favorite: true,
        }),
    ))
}

pub async fn delete_favorite(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(mod_id): Path<ResourceId>,
) -> Result<Json<FavoriteStatusResponse>, ApiError> {
    state.favorites.delete_favorite(user.user_id, mod_id).await?;
    Ok(Json(FavoriteStatusResponse {
        mod_id,
        favorite: false,
    }))
}

pub async fn check_favorite(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<FavoriteQuery>,
) -> Result<Json<FavoriteStatusResponse>, ApiError> {
    let favorite = state
        .favorites
        .is_favorite(user.user_id, query.mod_id)
        .await?;
    Ok(Json(FavoriteStatusResponse {
        mod_id: query.mod_id,
        favorite,
    }))
}

pub async fn record_download(
    State(state): State<AppState>,
    Path((mod_id, version_id)): Path<(ResourceId, ResourceId)>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.downloads.record_download(mod_id, version_id).await?;
    Ok(Json(CountResponse {
        resource: ResourceType::ModVersion,
        id: version_id,
        field: CounterColumn::Downloads,
        count,
    }))
}

pub async fn get_count(
    State(state): State<AppState>,
    Path((resource, id, field)): Path<(String, ResourceId, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let resource = ResourceType::from_str(&resource).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::UNKNOWN_RESOURCE,
            "Unknown resource type",
            Some(err.to_string()),
        )
    })?;
    let field = CounterColumn::from_str(&field).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::UNKNOWN_FIELD,
            "Unknown counter field",
            Some(err.to_string()),
        )
    })?;

    let count = state.downloads.count(resource, id, field).await?;
    Ok(Json(CountResponse {
        resource,
        id,
        field,
        count,
    }))
}

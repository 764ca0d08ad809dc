use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    CreatePropertyRequest, ListQuery, PropertyPage, TransferRequestBody, UpdatePropertyRequest,
    VerificationRequest,
};
use super::repo_types::{Property, PropertyStats};
use crate::auth::AuthUser;
use crate::documents::Document;
use crate::error::AppResult;
use crate::response::ApiResponse;
use crate::state::AppState;

pub fn property_routes() -> Router<AppState> {
    Router::new()
        .route("/properties", get(list_properties).post(create_property))
        .route("/properties/stats", get(property_stats))
        .route(
            "/properties/:id",
            get(get_property).patch(update_property).delete(delete_property),
        )
        .route("/properties/:id/documents", get(get_documents))
        .route("/properties/:id/verify", post(verify_property))
        .route("/properties/:id/quick-approve", post(quick_approve))
        .route("/properties/:id/quick-reject", post(quick_reject))
        .route("/properties/:id/transfer", post(request_transfer))
        .route("/properties/:id/transfer/verify", post(verify_transfer))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

#[instrument(skip(state, payload))]
pub async fn create_property(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(payload): Json<CreatePropertyRequest>,
) -> AppResult<ApiResponse<Property>> {
    let property = state
        .properties
        .submit(caller.id, payload.into_input()?)
        .await?;
    Ok(ApiResponse::created("Property submitted for verification", property))
}

#[instrument(skip(state))]
pub async fn list_properties(
    State(state): State<AppState>,
    _caller: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<ApiResponse<PropertyPage>> {
    let page = state.properties.list(query.into_filter()?).await?;
    Ok(ApiResponse::ok("Properties", page))
}

#[instrument(skip(state))]
pub async fn property_stats(
    State(state): State<AppState>,
    _caller: AuthUser,
) -> AppResult<ApiResponse<PropertyStats>> {
    Ok(ApiResponse::ok("Property stats", state.properties.stats().await?))
}

#[instrument(skip(state))]
pub async fn get_property(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<Property>> {
    Ok(ApiResponse::ok("Property", state.properties.get(id).await?))
}

#[instrument(skip(state))]
pub async fn get_documents(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<Vec<Document>>> {
    Ok(ApiResponse::ok(
        "Property documents",
        state.properties.documents(id).await?,
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_property(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePropertyRequest>,
) -> AppResult<ApiResponse<Property>> {
    let property = state
        .properties
        .update(id, caller.id, payload.into_input()?)
        .await?;
    Ok(ApiResponse::ok("Property updated", property))
}

#[instrument(skip(state))]
pub async fn delete_property(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<()>> {
    state.properties.delete(id, caller.id).await?;
    Ok(ApiResponse::ok("Property deleted", ()))
}

#[instrument(skip(state, payload))]
pub async fn verify_property(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerificationRequest>,
) -> AppResult<ApiResponse<Property>> {
    let property = state
        .properties
        .adjudicate(id, caller.id, payload.into_verdict()?)
        .await?;
    Ok(ApiResponse::ok("Property verification recorded", property))
}

#[instrument(skip(state))]
pub async fn quick_approve(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<Property>> {
    let property = state.properties.quick_approve(id, caller.id).await?;
    Ok(ApiResponse::ok("Property approved", property))
}

#[instrument(skip(state))]
pub async fn quick_reject(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<Property>> {
    let property = state.properties.quick_reject(id, caller.id).await?;
    Ok(ApiResponse::ok("Property rejected", property))
}

#[instrument(skip(state, payload))]
pub async fn request_transfer(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransferRequestBody>,
) -> AppResult<ApiResponse<Property>> {
    let property = state
        .properties
        .request_transfer(id, caller.id, payload.into_input()?)
        .await?;
    Ok(ApiResponse::ok("Transfer requested", property))
}

#[instrument(skip(state, payload))]
pub async fn verify_transfer(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerificationRequest>,
) -> AppResult<ApiResponse<Property>> {
    let property = state
        .properties
        .adjudicate_transfer(id, caller.id, payload.into_verdict()?)
        .await?;
    Ok(ApiResponse::ok("Transfer verification recorded", property))
}

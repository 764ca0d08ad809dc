use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    AuthSession, EmailRequest, LoginRequest, PublicUser, RefreshRequest, RegisterRequest,
    RegistrationPending, ResetPasswordRequest, VerifyEmailRequest,
};
use super::extractors::AuthUser;
use super::jwt::AuthTokens;
use crate::error::AppResult;
use crate::response::ApiResponse;
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify-email", get(verify_email_link).post(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", post(logout))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB, identity images
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/users/:id/activate", post(activate_seller))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<ApiResponse<RegistrationPending>> {
    let pending = state.onboarding.register(payload.into_input()?).await?;
    Ok(ApiResponse::created(
        "Registration received. Check your email to verify your account.",
        pending,
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AppResult<ApiResponse<AuthSession>> {
    let session = state.onboarding.verify_email(&payload.token).await?;
    Ok(ApiResponse::ok("Email verified", session))
}

/// Target of the link in the verification email.
#[instrument(skip(state, query))]
pub async fn verify_email_link(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailRequest>,
) -> AppResult<ApiResponse<AuthSession>> {
    let session = state.onboarding.verify_email(&query.token).await?;
    Ok(ApiResponse::ok("Email verified", session))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<ApiResponse<RegistrationPending>> {
    let pending = state.onboarding.resend_verification(&payload.email).await?;
    Ok(ApiResponse::ok("Verification email resent", pending))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<ApiResponse<AuthSession>> {
    let session = state
        .onboarding
        .login(&payload.email, &payload.password)
        .await?;
    Ok(ApiResponse::ok("Login successful", session))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<ApiResponse<AuthTokens>> {
    let tokens = state.onboarding.refresh(&payload.refresh_token).await?;
    Ok(ApiResponse::ok("Token refreshed", tokens))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<ApiResponse<()>> {
    state.onboarding.forgot_password(&payload.email).await?;
    Ok(ApiResponse::ok("Password reset email sent", ()))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<ApiResponse<()>> {
    state
        .onboarding
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(ApiResponse::ok("Password has been reset", ()))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<ApiResponse<()>> {
    state.onboarding.logout(&payload.refresh_token).await?;
    Ok(ApiResponse::ok("Logged out", ()))
}

#[instrument(skip(state, caller), fields(user_id = %caller.id, role = %caller.role))]
pub async fn get_me(
    State(state): State<AppState>,
    caller: AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    let me = state.onboarding.me(caller.id).await?;
    Ok(ApiResponse::ok("Profile", me))
}

#[instrument(skip(state, caller), fields(admin_id = %caller.id))]
pub async fn activate_seller(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<PublicUser>> {
    let seller = state.onboarding.activate_seller(id, caller.id).await?;
    Ok(ApiResponse::ok("Seller activated", seller))
}

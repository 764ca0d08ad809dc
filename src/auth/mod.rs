use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;
mod staged;

#[cfg(test)]
mod tests;

pub use extractors::AuthUser;
pub use jwt::JwtKeys;
pub use password::Hasher;
pub use services::OnboardingService;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
        .merge(handlers::admin_routes())
}

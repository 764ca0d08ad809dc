use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod transfer;


pub use repo::{PgPropertyRepo, PropertyRepo};
pub use services::PropertyService;

pub fn router() -> Router<AppState> {
    handlers::property_routes()
}

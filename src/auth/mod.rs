use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod context;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod repo_types;
pub mod services;
pub mod validation;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}

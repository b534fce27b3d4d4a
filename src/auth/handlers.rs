use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use tracing::instrument;

use super::context::RequestContext;
use super::dto::{
    AvatarUpload, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, OtpVerifyRequest,
    RegisterForm, ResetPasswordRequest, SessionData,
};
use super::otp::OtpChallenge;
use super::services;
use crate::error::{ApiResponse, AppError, AppResult};
use crate::state::AppState;

const AVATAR_LIMIT: usize = 10 * 1024 * 1024; // 10MB

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/auth/register",
            post(register).layer(DefaultBodyLimit::max(AVATAR_LIMIT)),
        )
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", get(logout))
        .route("/auth/otp-verify", post(otp_verify))
        .route("/auth/reset-otp", get(reset_otp))
        .route("/auth/change-password", put(change_password))
}

/// `{otp?, <expiry_key>}`; the code is only echoed when configured to.
fn otp_meta(state: &AppState, challenge: &OtpChallenge, expiry_key: &str) -> AppResult<Value> {
    let expires = challenge
        .expires_at
        .format(&Rfc3339)
        .map_err(|e| anyhow::anyhow!("format otp expiry: {e}"))?;
    let mut meta = json!({ expiry_key: expires });
    if state.config.otp.expose_in_response {
        meta["otp"] = json!(challenge.code);
    }
    Ok(meta)
}

fn text(bytes: &[u8]) -> AppResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| AppError::validation("Form fields must be UTF-8 text"))
}

/// Reads the signup form; `avatar` is the only file part.
async fn read_register_form(mut mp: Multipart) -> AppResult<(RegisterForm, Option<AvatarUpload>)> {
    let mut form = RegisterForm::default();
    let mut avatar = None;
    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "avatar" {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = field.bytes().await?;
            if !body.is_empty() {
                avatar = Some(AvatarUpload { body, content_type });
            }
            continue;
        }
        let value = Some(text(&field.bytes().await?)?);
        match name.as_str() {
            "name" => form.name = value,
            "email" => form.email = value,
            "phone" => form.phone = value,
            "password" => form.password = value,
            "role_id" => form.role_id = value,
            "organization_id" => form.organization_id = value,
            _ => {}
        }
    }
    Ok((form, avatar))
}

#[instrument(skip(state, mp))]
pub async fn register(State(state): State<AppState>, mp: Multipart) -> AppResult<ApiResponse<SessionData>> {
    let (form, avatar) = read_register_form(mp).await?;
    let outcome = services::signup(&state, form, avatar).await?;
    let meta = otp_meta(&state, &outcome.challenge, "expireDate")?;
    Ok(ApiResponse::ok("User signup completed successfully", outcome.session).with_meta(meta))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<ApiResponse<SessionData>> {
    let Json(req) = payload?;
    let session = services::login(&state, req).await?;
    Ok(ApiResponse::ok("Login Successful", session))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn logout(State(state): State<AppState>, ctx: RequestContext) -> AppResult<ApiResponse<()>> {
    services::logout(&state, &ctx).await?;
    Ok(ApiResponse::ok("You have been logged out", ()))
}

#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn otp_verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<OtpVerifyRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Value>> {
    let Json(req) = payload?;
    services::activate(&state, &ctx, req).await?;
    Ok(ApiResponse::ok("Account Activated Successfully", json!({ "isActivated": true })).with_meta(json!({})))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn reset_otp(State(state): State<AppState>, ctx: RequestContext) -> AppResult<ApiResponse<()>> {
    let challenge = services::reset_otp(&state, &ctx).await?;
    let meta = otp_meta(&state, &challenge, "otpExpireTime")?;
    Ok(ApiResponse::ok("The reset otp sent successfully", ()).with_meta(meta))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<()>> {
    let Json(req) = payload?;
    let challenge = services::forgot_password(&state, req).await?;
    let meta = otp_meta(&state, &challenge, "otpExpireTime")?;
    Ok(ApiResponse::ok("The reset otp sent successfully", ()).with_meta(meta))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Value>> {
    let Json(req) = payload?;
    services::reset_password(&state, req).await?;
    Ok(ApiResponse::ok(
        "Your password has been successfully reset. You can now log in with your new credentials.",
        json!({}),
    )
    .with_meta(json!({ "count": 1 })))
}

#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<()>> {
    let Json(req) = payload?;
    services::change_password(&state, &ctx, req).await?;
    Ok(ApiResponse::ok("Your password has been changed", ()).with_meta(json!({ "count": 0 })))
}

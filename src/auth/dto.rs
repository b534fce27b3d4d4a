use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::User;
use crate::roles::permissions::PermissionSet;
use crate::roles::repo_types::Role;

/// Signup fields, collected from the multipart form.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<String>,
    pub organization_id: Option<String>,
}

/// Avatar part of the signup form.
#[derive(Debug)]
pub struct AvatarUpload {
    pub body: bytes::Bytes,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub fcm_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub identifier: Option<String>,
    pub otp: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyRequest {
    pub otp: Option<String>,
}

/// Accepts `true` or `"true"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseBool {
    Bool(bool),
    Text(String),
}

impl LooseBool {
    pub fn is_true(&self) -> bool {
        match self {
            LooseBool::Bool(b) => *b,
            LooseBool::Text(s) => s == "true",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub is_delete_log_history: Option<LooseBool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleView {
    pub id: Uuid,
    pub name: String,
    pub permissions: PermissionSet,
}

impl From<&Role> for RoleView {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            permissions: role.permissions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<RoleView>,
    pub is_activated: bool,
    pub is_approved: bool,
}

impl UserView {
    pub fn new(user: &User, role: Option<&Role>) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
            image: user.avatar.clone(),
            avatar: user.avatar.clone(),
            role: role.map(RoleView::from),
            is_activated: user.is_activated,
            is_approved: user.is_approved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub access_token: String,
    pub user: UserView,
}

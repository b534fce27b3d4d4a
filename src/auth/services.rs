use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::context::RequestContext;
use super::dto::{
    AvatarUpload, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, OtpVerifyRequest,
    RegisterForm, ResetPasswordRequest, SessionData, UserView,
};
use super::otp::{OtpChallenge, OtpError};
use super::password::{hash_password, verify_or_burn, verify_password};
use super::repo_types::{NewUser, User, UserField, UserPatch};
use super::validation::{
    check_contact, check_password, duplicate_conflict, normalize_email, present, required,
};
use crate::error::{AppError, AppResult};
use crate::organizations::OrganizationField;
use crate::roles::repo_types::{Role, RoleField, SUPER_ADMIN};
use crate::state::AppState;
use crate::storage::avatar_key;
use crate::store::{Filter, Order, Page, Query, SetOp};

const USER_NOT_FOUND: &str = "The user does not exist. Please check your input and try again.";
const BAD_CREDENTIALS: &str = "Your credentials are incorrect";

#[derive(Debug)]
pub struct SignupOutcome {
    pub session: SessionData,
    pub challenge: OtpChallenge,
}

fn by_id(id: Uuid) -> Query<UserField> {
    Filter::eq(UserField::Id, id).into()
}

/// Emails are stored lowercased, so an identifier that looks like one is
/// matched the same way.
fn by_identifier(identifier: &str) -> Filter<UserField> {
    Filter::any(vec![
        Filter::eq(UserField::Phone, identifier),
        Filter::eq(UserField::Email, normalize_email(identifier)),
    ])
}

/// Activated, live users already holding the phone or the email.
pub(crate) async fn find_duplicates(
    state: &AppState,
    phone: Option<&str>,
    email: Option<&str>,
) -> AppResult<Option<&'static str>> {
    let mut holders = Vec::new();
    if let Some(p) = phone {
        holders.push(Filter::eq(UserField::Phone, p));
    }
    if let Some(e) = email {
        holders.push(Filter::eq(UserField::Email, e));
    }
    let existing = state
        .users
        .find_many(
            Query::new(Filter::any(holders).and(Filter::eq(UserField::IsActivated, true))),
            Page::all(),
        )
        .await?;
    Ok(duplicate_conflict(&existing, phone, email))
}

async fn deliver_otp(state: &AppState, user: &User, code: &str) {
    let Some(destination) = user.otp_destination() else {
        warn!(user_id = %user.id, "no destination for otp");
        return;
    };
    if let Err(e) = state.otp_sender.send(destination, code).await {
        error!(error = %e, user_id = %user.id, "otp delivery failed");
    }
}

/// Stores a fresh challenge on `user` and sends it out. The write only lands
/// while no unexpired code is stored, so concurrent requests issue one code.
async fn issue_otp(state: &AppState, user: &User) -> AppResult<OtpChallenge> {
    let now = OffsetDateTime::now_utc();
    let challenge = state.otp.issue_challenge(user, now)?;
    let slot_free = Filter::any(vec![
        Filter::eq(UserField::Otp, Option::<String>::None),
        Filter::lt(UserField::OtpExpireTime, now),
    ]);
    state
        .users
        .update_one(
            Query::new(Filter::eq(UserField::Id, user.id).and(slot_free)),
            UserPatch::default().challenge(challenge.clone()),
        )
        .await?
        .ok_or(OtpError::Pending {
            minutes: state.otp.ttl_minutes(),
        })?;
    deliver_otp(state, user, &challenge.code).await;
    Ok(challenge)
}

/// Compensating step: never masks the error that triggered it.
async fn discard_upload(state: &AppState, key: &str) {
    match state.storage.delete_object(key).await {
        Ok(()) => info!(%key, "orphaned upload removed"),
        Err(e) => error!(error = %e, %key, "failed to remove orphaned upload"),
    }
}

#[instrument(skip_all)]
pub async fn signup(
    state: &AppState,
    form: RegisterForm,
    avatar: Option<AvatarUpload>,
) -> AppResult<SignupOutcome> {
    let avatar_key = match avatar {
        Some(upload) => {
            let key = avatar_key(&upload.content_type);
            state
                .storage
                .put_object(&key, upload.body, &upload.content_type)
                .await?;
            Some(key)
        }
        None => None,
    };

    match register(state, form, avatar_key.as_deref()).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Some(key) = &avatar_key {
                discard_upload(state, key).await;
            }
            Err(e)
        }
    }
}

async fn register(state: &AppState, form: RegisterForm, avatar_key: Option<&str>) -> AppResult<SignupOutcome> {
    let email = present(form.email).map(|e| normalize_email(&e));
    let phone = present(form.phone);
    let name = required("name", form.name)?;
    let password = required("password", form.password)?;
    let role_id = required("role_id", form.role_id)?;
    let organization_id = required("organization_id", form.organization_id)?;
    check_contact(email.as_deref(), phone.as_deref())?;
    check_password(&password)?;

    if let Some(msg) = find_duplicates(state, phone.as_deref(), email.as_deref()).await? {
        return Err(AppError::validation(msg));
    }

    let role = match Uuid::parse_str(&role_id) {
        Ok(id) => assignable_role(state, id).await?,
        Err(_) => None,
    }
    .ok_or_else(|| AppError::validation("Role not found"))?;

    let organization = match Uuid::parse_str(&organization_id) {
        Ok(id) => {
            state
                .organizations
                .find_one(Filter::eq(OrganizationField::Id, id).into())
                .await?
        }
        Err(_) => None,
    }
    .ok_or_else(|| AppError::validation("Organization not found"))?;

    let user = state
        .users
        .create(NewUser {
            name: Some(name.clone()),
            email,
            phone,
            password_hash: hash_password(&password)?,
            avatar: avatar_key.map(|k| state.storage.file_url(k)),
            role_id: Some(role.id),
            organization_id: Some(organization.id),
            ..NewUser::default()
        })
        .await?;

    let now = OffsetDateTime::now_utc();
    let token = state.tokens.issue(user.id, Some(role.id), Some(&name), now)?;
    let challenge = state.otp.issue_challenge(&user, now)?;
    let user = state
        .users
        .update_one(
            by_id(user.id),
            UserPatch::default()
                .access_tokens(SetOp::Add(token.clone()))
                .logged_at(now)
                .challenge(challenge.clone()),
        )
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished during signup", user.id))?;

    deliver_otp(state, &user, &challenge.code).await;
    info!(user_id = %user.id, role = %role.name, "user signed up");

    Ok(SignupOutcome {
        session: SessionData {
            access_token: token,
            user: UserView::new(&user, Some(&role)),
        },
        challenge,
    })
}

#[instrument(skip_all)]
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<SessionData> {
    let username = required("username", req.username)?;
    let password = required("password", req.password)?;

    let candidate = state
        .users
        .find_one(
            Query::new(by_identifier(&username).and(Filter::eq(UserField::Status, true)))
                .sort_by(UserField::IsActivated, Order::Desc)
                .sort_by(UserField::CreatedAt, Order::Desc),
        )
        .await?;

    let verified = verify_or_burn(&password, candidate.as_ref().map(|u| u.password_hash.as_str()))?;
    let user = match candidate {
        Some(user) if verified => user,
        _ => {
            warn!("login rejected");
            return Err(AppError::unauthorized(BAD_CREDENTIALS));
        }
    };

    let role = match user.role_id {
        Some(id) => state.roles.find_one(Filter::eq(RoleField::Id, id).into()).await?,
        None => None,
    };

    let now = OffsetDateTime::now_utc();
    let token = state.tokens.issue(user.id, user.role_id, user.name.as_deref(), now)?;
    let mut patch = UserPatch::default()
        .access_tokens(SetOp::Add(token.clone()))
        .logged_at(now);
    if let Some(fcm) = present(req.fcm_token) {
        patch = patch.fcm_tokens(SetOp::Add(fcm));
    }
    let user = state
        .users
        .update_one(by_id(user.id), patch)
        .await?
        .ok_or_else(|| AppError::unauthorized(BAD_CREDENTIALS))?;

    info!(user_id = %user.id, "user logged in");
    Ok(SessionData {
        access_token: token,
        user: UserView::new(&user, role.as_ref()),
    })
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn logout(state: &AppState, ctx: &RequestContext) -> AppResult<()> {
    state
        .users
        .update_one(
            by_id(ctx.user_id),
            UserPatch::default().access_tokens(SetOp::Remove(ctx.access_token.clone())),
        )
        .await?;
    info!("user logged out");
    Ok(())
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn activate(state: &AppState, ctx: &RequestContext, req: OtpVerifyRequest) -> AppResult<()> {
    let code = required("otp", req.otp)?;
    let user = &ctx.user;
    if user.is_activated {
        return Err(AppError::validation("Account already activated"));
    }
    state.otp.validate(user, &code, OffsetDateTime::now_utc())?;

    // Conditional on the code so a concurrent submission cannot reuse it.
    let activated = state
        .users
        .update_one(
            Query::new(Filter::eq(UserField::Id, user.id).and(Filter::eq(UserField::Otp, code.as_str()))),
            UserPatch::default().clear_challenge().activated(),
        )
        .await?
        .ok_or(OtpError::Expired)?;

    if let Some(email) = activated.email.as_deref() {
        let purged = state
            .users
            .delete_many(
                Query::new(
                    Filter::eq(UserField::Email, email)
                        .and(Filter::eq(UserField::IsActivated, false))
                        .and(Filter::ne(UserField::Id, activated.id)),
                )
                .including_deleted(),
            )
            .await?;
        if purged > 0 {
            info!(purged, "abandoned duplicate signups removed");
        }
    }
    info!("account activated");
    Ok(())
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn reset_otp(state: &AppState, ctx: &RequestContext) -> AppResult<OtpChallenge> {
    if !ctx.user.status {
        return Err(AppError::not_found(USER_NOT_FOUND));
    }
    issue_otp(state, &ctx.user).await
}

async fn find_resettable(state: &AppState, identifier: &str) -> AppResult<User> {
    state
        .users
        .find_one(
            Query::new(
                by_identifier(identifier)
                    .and(Filter::eq(UserField::Status, true))
                    .and(Filter::eq(UserField::IsActivated, true)),
            )
            .sort_by(UserField::CreatedAt, Order::Desc),
        )
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
}

#[instrument(skip_all)]
pub async fn forgot_password(state: &AppState, req: ForgotPasswordRequest) -> AppResult<OtpChallenge> {
    let identifier = required("identifier", req.identifier)?;
    let user = find_resettable(state, &identifier).await?;
    let challenge = issue_otp(state, &user).await?;
    info!(user_id = %user.id, "password reset code issued");
    Ok(challenge)
}

#[instrument(skip_all)]
pub async fn reset_password(state: &AppState, req: ResetPasswordRequest) -> AppResult<()> {
    let identifier = required("identifier", req.identifier)?;
    let code = required("otp", req.otp)?;
    let password = required("password", req.password)?;
    check_password(&password)?;

    let user = find_resettable(state, &identifier).await?;
    state.otp.validate(&user, &code, OffsetDateTime::now_utc())?;

    state
        .users
        .update_one(
            Query::new(Filter::eq(UserField::Id, user.id).and(Filter::eq(UserField::Otp, code.as_str()))),
            UserPatch::default()
                .password_hash(hash_password(&password)?)
                .clear_challenge(),
        )
        .await?
        .ok_or(OtpError::Expired)?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn change_password(state: &AppState, ctx: &RequestContext, req: ChangePasswordRequest) -> AppResult<()> {
    let current = required("currentPassword", req.current_password)?;
    let new = required("newPassword", req.new_password)?;
    let hash = &ctx.user.password_hash;

    if !verify_password(&current, hash)? {
        return Err(AppError::validation(BAD_CREDENTIALS));
    }
    if verify_password(&new, hash)? {
        return Err(AppError::validation(
            "Please choose a different password from your previous one",
        ));
    }
    check_password(&new)?;

    let sign_out_everywhere = req.is_delete_log_history.is_some_and(|f| f.is_true());
    let mut patch = UserPatch::default().password_hash(hash_password(&new)?);
    if sign_out_everywhere {
        patch = patch.access_tokens(SetOp::Clear);
    }
    state.users.update_one(by_id(ctx.user_id), patch).await?;
    info!(sign_out_everywhere, "password changed");
    Ok(())
}

/// Live role by id; `None` for the reserved role.
pub(crate) async fn assignable_role(state: &AppState, id: Uuid) -> AppResult<Option<Role>> {
    Ok(state
        .roles
        .find_one(
            Filter::eq(RoleField::Id, id)
                .and(Filter::ne(RoleField::Name, SUPER_ADMIN))
                .into(),
        )
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::context::authorize;
    use crate::auth::dto::LooseBool;
    use crate::roles::permissions::PermissionSet;
    use crate::store::Collection;
    use crate::test_support::{CapturingSender, RecordingStorage, SeedUser, TestEnv, PASSWORD};
    use bytes::Bytes;
    use std::sync::Arc;

    struct Fixture {
        env: TestEnv,
        role: Role,
        org_id: Uuid,
    }

    async fn fixture_with(env: TestEnv) -> Fixture {
        let role = env.seed_role("member", PermissionSet::all()).await;
        let org_id = env.seed_org().await.id;
        Fixture { env, role, org_id }
    }

    async fn fixture() -> Fixture {
        fixture_with(TestEnv::new()).await
    }

    impl Fixture {
        fn form(&self, email: &str, phone: &str) -> RegisterForm {
            RegisterForm {
                name: Some("A".into()),
                email: Some(email.into()),
                phone: Some(phone.into()),
                password: Some("Secret1!".into()),
                role_id: Some(self.role.id.to_string()),
                organization_id: Some(self.org_id.to_string()),
            }
        }

        async fn context(&self, token: &str, path: &str) -> RequestContext {
            authorize(&self.env.state, path, Some(&format!("Bearer {token}")))
                .await
                .unwrap()
        }

        async fn signup_activated(&self, email: &str, phone: &str) -> SignupOutcome {
            let out = signup(&self.env.state, self.form(email, phone), None).await.unwrap();
            let ctx = self.context(&out.session.access_token, "/api/v1/auth/otp-verify").await;
            activate(
                &self.env.state,
                &ctx,
                OtpVerifyRequest {
                    otp: Some(out.challenge.code.clone()),
                },
            )
            .await
            .unwrap();
            out
        }
    }

    fn avatar() -> Option<AvatarUpload> {
        Some(AvatarUpload {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".into(),
        })
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: Some(username.into()),
            password: Some(password.into()),
            fcm_token: None,
        }
    }

    #[tokio::test]
    async fn signup_issues_token_and_challenge() {
        let f = fixture().await;
        let out = signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.unwrap();

        assert!(!out.session.user.is_activated);
        assert_eq!(out.challenge.code.len(), 4);
        let stored = f.env.reload(out.session.user.id).await;
        assert!(stored.holds_token(&out.session.access_token));
        assert_eq!(stored.challenge, Some(out.challenge.clone()));
        assert_ne!(stored.password_hash, "Secret1!");
        assert_eq!(f.env.sender.last_code(), Some(out.challenge.code));
    }

    #[tokio::test]
    async fn second_signup_reports_combined_conflict_once_first_is_active() {
        let f = fixture().await;
        f.signup_activated("a@x.com", "+15551234567").await;

        let err = signup(&f.env.state, f.form("a@x.com", "+15551234567"), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email and Phone Number Already exist. Please login now");
    }

    #[tokio::test]
    async fn unactivated_accounts_do_not_block_signup() {
        let f = fixture().await;
        signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.unwrap();
        assert!(signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.is_ok());
    }

    #[tokio::test]
    async fn signup_validates_input_in_order() {
        let f = fixture().await;
        let mut form = f.form("a@x.com", "+15551234567");
        form.name = Some(" ".into());
        assert_eq!(
            signup(&f.env.state, form, None).await.unwrap_err().to_string(),
            "name field is required"
        );

        let form = RegisterForm {
            email: None,
            phone: None,
            ..f.form("", "")
        };
        assert_eq!(
            signup(&f.env.state, form, None).await.unwrap_err().to_string(),
            "Email or Phone number are required"
        );

        let err = signup(&f.env.state, f.form("a@x.com", "0155"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid phone number");
        let err = signup(&f.env.state, f.form("not-an-email", "+15551234567"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid email");
    }

    #[tokio::test]
    async fn signup_rejects_missing_or_reserved_references() {
        let f = fixture().await;
        let mut form = f.form("a@x.com", "+15551234567");
        form.role_id = Some(Uuid::new_v4().to_string());
        assert_eq!(signup(&f.env.state, form, None).await.unwrap_err().to_string(), "Role not found");

        let admin = f.env.seed_role(SUPER_ADMIN, PermissionSet::all()).await;
        let mut form = f.form("a@x.com", "+15551234567");
        form.role_id = Some(admin.id.to_string());
        assert_eq!(signup(&f.env.state, form, None).await.unwrap_err().to_string(), "Role not found");

        let mut form = f.form("a@x.com", "+15551234567");
        form.organization_id = Some("nope".into());
        assert_eq!(
            signup(&f.env.state, form, None).await.unwrap_err().to_string(),
            "Organization not found"
        );
    }

    #[tokio::test]
    async fn failed_signup_removes_the_uploaded_avatar() {
        let f = fixture().await;
        let mut form = f.form("a@x.com", "+15551234567");
        form.organization_id = Some(Uuid::new_v4().to_string());

        assert!(signup(&f.env.state, form, avatar()).await.is_err());
        let stored = f.env.storage.stored.lock().unwrap().clone();
        let deleted = f.env.storage.deleted.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored, deleted);
    }

    #[tokio::test]
    async fn compensation_failure_keeps_the_original_error() {
        let storage = RecordingStorage {
            fail_delete: true,
            ..RecordingStorage::default()
        };
        let env = TestEnv::with(crate::test_support::test_config(), storage, CapturingSender::default());
        let f = fixture_with(env).await;
        let mut form = f.form("a@x.com", "+15551234567");
        form.password = Some("short".into());

        let err = signup(&f.env.state, form, avatar()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.starts_with("Password must")));
    }

    #[tokio::test]
    async fn successful_signup_keeps_the_avatar() {
        let f = fixture().await;
        let out = signup(&f.env.state, f.form("a@x.com", "+15551234567"), avatar()).await.unwrap();
        assert!(f.env.storage.deleted.lock().unwrap().is_empty());
        let url = out.session.user.avatar.unwrap();
        assert!(url.starts_with("https://files.test/avatars/"));
        assert_eq!(out.session.user.image.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn otp_delivery_failure_does_not_fail_signup() {
        let sender = CapturingSender {
            fail: true,
            ..CapturingSender::default()
        };
        let env = TestEnv::with(crate::test_support::test_config(), RecordingStorage::default(), sender);
        let f = fixture_with(env).await;
        assert!(signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.is_ok());
    }

    #[tokio::test]
    async fn login_by_email_or_phone_adds_session() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com").phone("+15550001111")).await;

        let by_email = login(&env.state, login_req("a@x.com", PASSWORD)).await.unwrap();
        let mut req = login_req("+15550001111", PASSWORD);
        req.fcm_token = Some("fcm-1".into());
        let by_phone = login(&env.state, req).await.unwrap();

        let stored = env.reload(seeded.user.id).await;
        assert!(stored.holds_token(&by_email.access_token));
        assert!(stored.holds_token(&by_phone.access_token));
        assert_eq!(stored.fcm_tokens, vec!["fcm-1"]);
        assert!(stored.last_log_at.is_some());
        assert_eq!(by_email.user.role.unwrap().id, seeded.role.id);
    }

    #[tokio::test]
    async fn login_failures_share_one_message() {
        let env = TestEnv::new();
        env.seed_user(SeedUser::active("a@x.com")).await;

        let wrong = login(&env.state, login_req("a@x.com", "not-the-password")).await.unwrap_err();
        let unknown = login(&env.state, login_req("nobody@x.com", PASSWORD)).await.unwrap_err();
        assert!(matches!(wrong, AppError::Unauthorized(_)));
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(unknown.to_string(), BAD_CREDENTIALS);
    }

    #[tokio::test]
    async fn login_does_not_require_activation_but_does_require_status() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::pending("a@x.com")).await;
        assert!(login(&env.state, login_req("a@x.com", PASSWORD)).await.is_ok());

        env.users
            .update_one(by_id(seeded.user.id), UserPatch::default().enabled(false))
            .await
            .unwrap();
        let err = login(&env.state, login_req("a@x.com", PASSWORD)).await.unwrap_err();
        assert_eq!(err.to_string(), BAD_CREDENTIALS);
    }

    #[tokio::test]
    async fn concurrent_logins_keep_every_push_handle() {
        let env = Arc::new(TestEnv::new());
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;

        let mut tasks = Vec::new();
        for n in 0..8 {
            let env = env.clone();
            tasks.push(tokio::spawn(async move {
                let mut req = login_req("a@x.com", PASSWORD);
                req.fcm_token = Some(format!("fcm-{n}"));
                login(&env.state, req).await.unwrap()
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let stored = env.reload(seeded.user.id).await;
        assert_eq!(stored.fcm_tokens.len(), 8);
        assert!(!stored.access_tokens.is_empty());
    }

    #[tokio::test]
    async fn logout_revokes_only_the_presented_token() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let phone_session = login(&env.state, login_req("a@x.com", PASSWORD)).await.unwrap();
        let web_token = env.login_token(&seeded.user).await;

        let ctx = authorize(&env.state, "/api/v1/auth/logout", Some(&format!("Bearer {web_token}")))
            .await
            .unwrap();
        logout(&env.state, &ctx).await.unwrap();

        let stored = env.reload(seeded.user.id).await;
        assert!(!stored.holds_token(&web_token));
        assert!(stored.holds_token(&phone_session.access_token));
    }

    #[tokio::test]
    async fn activation_consumes_the_code_and_purges_abandoned_duplicates() {
        let f = fixture().await;
        let abandoned = signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.unwrap();
        let out = signup(&f.env.state, f.form("a@x.com", "+15551234568"), None).await.unwrap();
        let other = signup(&f.env.state, f.form("b@x.com", "+15551234569"), None).await.unwrap();

        let ctx = f.context(&out.session.access_token, "/api/v1/auth/otp-verify").await;
        let req = || OtpVerifyRequest {
            otp: Some(out.challenge.code.clone()),
        };
        activate(&f.env.state, &ctx, req()).await.unwrap();

        let stored = f.env.reload(out.session.user.id).await;
        assert!(stored.is_activated);
        assert!(stored.challenge.is_none());
        let remaining = f
            .env
            .users
            .find_many(Query::new(Filter::all()).including_deleted(), Page::all())
            .await
            .unwrap();
        assert!(remaining.iter().all(|u| u.id != abandoned.session.user.id));
        assert!(remaining.iter().any(|u| u.id == other.session.user.id));

        let err = activate(&f.env.state, &ctx, req()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn activation_rejects_wrong_code() {
        let f = fixture().await;
        let out = signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.unwrap();
        let ctx = f.context(&out.session.access_token, "/api/v1/auth/otp-verify").await;
        let wrong = if out.challenge.code == "0000" { "1111" } else { "0000" };
        let err = activate(&f.env.state, &ctx, OtpVerifyRequest { otp: Some(wrong.into()) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), OtpError::Mismatch.to_string());
    }

    #[tokio::test]
    async fn reset_otp_is_rate_limited_while_a_code_is_pending() {
        let f = fixture().await;
        let out = signup(&f.env.state, f.form("a@x.com", "+15551234567"), None).await.unwrap();
        let ctx = f.context(&out.session.access_token, "/api/v1/auth/reset-otp").await;
        let err = reset_otp(&f.env.state, &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), OtpError::Pending { minutes: 5 }.to_string());
    }

    #[tokio::test]
    async fn mixed_case_email_works_for_login_and_reset() {
        let f = fixture().await;
        f.signup_activated("Ann@X.com", "+15551234567").await;

        assert!(login(&f.env.state, login_req("Ann@X.com", "Secret1!")).await.is_ok());
        assert!(login(&f.env.state, login_req("ann@x.com", "Secret1!")).await.is_ok());
        let challenge = forgot_password(
            &f.env.state,
            ForgotPasswordRequest {
                identifier: Some("ANN@x.com".into()),
            },
        )
        .await
        .unwrap();
        reset_password(
            &f.env.state,
            ResetPasswordRequest {
                identifier: Some("Ann@X.com".into()),
                otp: Some(challenge.code),
                password: Some("BrandNew#2024".into()),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn racing_reset_otp_requests_issue_a_single_code() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let token = env.login_token(&seeded.user).await;
        let path = "/api/v1/auth/reset-otp";
        let header = format!("Bearer {token}");
        let first_ctx = authorize(&env.state, path, Some(&header)).await.unwrap();
        let second_ctx = authorize(&env.state, path, Some(&header)).await.unwrap();
        assert!(first_ctx.user.challenge.is_none() && second_ctx.user.challenge.is_none());

        let issued = reset_otp(&env.state, &first_ctx).await.unwrap();
        let err = reset_otp(&env.state, &second_ctx).await.unwrap_err();
        assert_eq!(err.to_string(), OtpError::Pending { minutes: 5 }.to_string());
        assert_eq!(env.reload(seeded.user.id).await.challenge, Some(issued));
    }

    #[tokio::test]
    async fn expired_code_can_be_replaced() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let stale = OtpChallenge {
            code: "1234".into(),
            expires_at: OffsetDateTime::now_utc() - time::Duration::minutes(1),
        };
        env.users
            .update_one(by_id(seeded.user.id), UserPatch::default().challenge(stale.clone()))
            .await
            .unwrap();
        let token = env.login_token(&seeded.user).await;
        let ctx = authorize(&env.state, "/api/v1/auth/reset-otp", Some(&format!("Bearer {token}")))
            .await
            .unwrap();

        let fresh = reset_otp(&env.state, &ctx).await.unwrap();
        assert_ne!(fresh, stale);
    }

    #[tokio::test]
    async fn forgot_then_reset_password() {
        let f = fixture().await;
        f.signup_activated("a@x.com", "+15551234567").await;

        let challenge = forgot_password(
            &f.env.state,
            ForgotPasswordRequest {
                identifier: Some("+15551234567".into()),
            },
        )
        .await
        .unwrap();
        let second = forgot_password(
            &f.env.state,
            ForgotPasswordRequest {
                identifier: Some("a@x.com".into()),
            },
        )
        .await;
        assert!(second.is_err());

        let reset = |otp: &str| ResetPasswordRequest {
            identifier: Some("a@x.com".into()),
            otp: Some(otp.into()),
            password: Some("BrandNew#2024".into()),
        };
        reset_password(&f.env.state, reset(&challenge.code)).await.unwrap();
        assert!(login(&f.env.state, login_req("a@x.com", "BrandNew#2024")).await.is_ok());

        let err = reset_password(&f.env.state, reset(&challenge.code)).await.unwrap_err();
        assert_eq!(err.to_string(), OtpError::Expired.to_string());
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_identifier_is_not_found() {
        let env = TestEnv::new();
        let err = forgot_password(
            &env.state,
            ForgotPasswordRequest {
                identifier: Some("ghost@x.com".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == USER_NOT_FOUND));
    }

    #[tokio::test]
    async fn change_password_rejects_reuse_without_writing() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let token = env.login_token(&seeded.user).await;
        let ctx = authorize(&env.state, "/api/v1/auth/change-password", Some(&format!("Bearer {token}")))
            .await
            .unwrap();

        let err = change_password(
            &env.state,
            &ctx,
            ChangePasswordRequest {
                current_password: Some(PASSWORD.into()),
                new_password: Some(PASSWORD.into()),
                is_delete_log_history: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Please choose a different password from your previous one");
        let after = env.reload(seeded.user.id).await;
        assert_eq!(after.updated_at, ctx.user.updated_at);
        assert_eq!(after.password_hash, ctx.user.password_hash);
    }

    #[tokio::test]
    async fn change_password_can_sign_out_everywhere() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let token = env.login_token(&seeded.user).await;
        login(&env.state, login_req("a@x.com", PASSWORD)).await.unwrap();
        let ctx = authorize(&env.state, "/api/v1/auth/change-password", Some(&format!("Bearer {token}")))
            .await
            .unwrap();

        change_password(
            &env.state,
            &ctx,
            ChangePasswordRequest {
                current_password: Some(PASSWORD.into()),
                new_password: Some("Another#Pass9".into()),
                is_delete_log_history: Some(LooseBool::Text("true".into())),
            },
        )
        .await
        .unwrap();

        let stored = env.reload(seeded.user.id).await;
        assert!(stored.access_tokens.is_empty());
        assert!(verify_password("Another#Pass9", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn change_password_with_wrong_current_is_rejected() {
        let env = TestEnv::new();
        let seeded = env.seed_user(SeedUser::active("a@x.com")).await;
        let token = env.login_token(&seeded.user).await;
        let ctx = authorize(&env.state, "/api/v1/auth/change-password", Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        let err = change_password(
            &env.state,
            &ctx,
            ChangePasswordRequest {
                current_password: Some("wrong-password".into()),
                new_password: Some("Another#Pass9".into()),
                is_delete_log_history: Some(LooseBool::Bool(true)),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), BAD_CREDENTIALS);
        assert!(env.reload(seeded.user.id).await.holds_token(&token));
    }
}

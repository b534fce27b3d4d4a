use sqlx::{postgres::PgRow, query_builder::Separated, FromRow, Postgres, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::otp::OtpChallenge;
use crate::store::{Document, Field, SetOp, Value};

/// User record in the database.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String, // argon2 PHC string
    pub avatar: Option<String>,
    pub role_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub access_tokens: Vec<String>,
    pub fcm_tokens: Vec<String>,
    pub last_log_at: Option<OffsetDateTime>,
    pub challenge: Option<OtpChallenge>,
    pub is_activated: bool,
    pub is_approved: bool,
    pub status: bool,
    pub existence: bool,
    pub created_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn holds_token(&self, token: &str) -> bool {
        self.access_tokens.iter().any(|t| t == token)
    }

    /// Where one-time codes are delivered: email first, then phone.
    pub fn otp_destination(&self) -> Option<&str> {
        self.email.as_deref().or(self.phone.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Id,
    Name,
    Email,
    Phone,
    Role,
    Organization,
    Otp,
    OtpExpireTime,
    IsActivated,
    IsApproved,
    Status,
    Existence,
    CreatedAt,
}

impl Field for UserField {
    fn column(self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Name => "name",
            UserField::Email => "email",
            UserField::Phone => "phone",
            UserField::Role => "role_id",
            UserField::Organization => "organization_id",
            UserField::Otp => "otp",
            UserField::OtpExpireTime => "otp_expire_time",
            UserField::IsActivated => "is_activated",
            UserField::IsApproved => "is_approved",
            UserField::Status => "status",
            UserField::Existence => "existence",
            UserField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub avatar: Option<String>,
    pub role_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub is_activated: bool,
    pub is_approved: bool,
    pub created_by: Option<Uuid>,
}

/// Partial update. `challenge: Some(None)` clears the pending OTP.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub password_hash: Option<String>,
    pub last_log_at: Option<OffsetDateTime>,
    pub challenge: Option<Option<OtpChallenge>>,
    pub is_activated: Option<bool>,
    pub status: Option<bool>,
    pub existence: Option<bool>,
    pub access_tokens: Option<SetOp>,
    pub fcm_tokens: Option<SetOp>,
}

impl UserPatch {
    pub fn password_hash(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }

    pub fn logged_at(mut self, at: OffsetDateTime) -> Self {
        self.last_log_at = Some(at);
        self
    }

    pub fn challenge(mut self, challenge: OtpChallenge) -> Self {
        self.challenge = Some(Some(challenge));
        self
    }

    pub fn clear_challenge(mut self) -> Self {
        self.challenge = Some(None);
        self
    }

    pub fn activated(mut self) -> Self {
        self.is_activated = Some(true);
        self
    }

    pub fn enabled(mut self, on: bool) -> Self {
        self.status = Some(on);
        self
    }

    pub fn access_tokens(mut self, op: SetOp) -> Self {
        self.access_tokens = Some(op);
        self
    }

    pub fn fcm_tokens(mut self, op: SetOp) -> Self {
        self.fcm_tokens = Some(op);
        self
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let otp: Option<String> = row.try_get("otp")?;
        let otp_expire_time: Option<OffsetDateTime> = row.try_get("otp_expire_time")?;
        let challenge = match (otp, otp_expire_time) {
            (Some(code), Some(expires_at)) => Some(OtpChallenge { code, expires_at }),
            _ => None,
        };
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            password_hash: row.try_get("password_hash")?,
            avatar: row.try_get("avatar")?,
            role_id: row.try_get("role_id")?,
            organization_id: row.try_get("organization_id")?,
            access_tokens: row.try_get("access_tokens")?,
            fcm_tokens: row.try_get("fcm_tokens")?,
            last_log_at: row.try_get("last_log_at")?,
            challenge,
            is_activated: row.try_get("is_activated")?,
            is_approved: row.try_get("is_approved")?,
            status: row.try_get("status")?,
            existence: row.try_get("existence")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Document for User {
    type Field = UserField;
    type New = NewUser;
    type Patch = UserPatch;

    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "id, name, email, phone, password_hash, avatar, role_id, \
        organization_id, access_tokens, fcm_tokens, last_log_at, otp, otp_expire_time, \
        is_activated, is_approved, status, existence, created_by, created_at, updated_at";
    const EXISTENCE: UserField = UserField::Existence;

    fn id(&self) -> Uuid {
        self.id
    }

    fn value(&self, field: UserField) -> Value {
        match field {
            UserField::Id => self.id.into(),
            UserField::Name => self.name.clone().into(),
            UserField::Email => self.email.clone().into(),
            UserField::Phone => self.phone.clone().into(),
            UserField::Role => self.role_id.into(),
            UserField::Organization => self.organization_id.into(),
            UserField::Otp => self.challenge.as_ref().map(|c| c.code.clone()).into(),
            UserField::OtpExpireTime => self.challenge.as_ref().map(|c| c.expires_at).into(),
            UserField::IsActivated => self.is_activated.into(),
            UserField::IsApproved => self.is_approved.into(),
            UserField::Status => self.status.into(),
            UserField::Existence => self.existence.into(),
            UserField::CreatedAt => self.created_at.into(),
        }
    }

    fn build(id: Uuid, new: NewUser, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            phone: new.phone,
            password_hash: new.password_hash,
            avatar: new.avatar,
            role_id: new.role_id,
            organization_id: new.organization_id,
            access_tokens: Vec::new(),
            fcm_tokens: Vec::new(),
            last_log_at: None,
            challenge: None,
            is_activated: new.is_activated,
            is_approved: new.is_approved,
            status: true,
            existence: true,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: &UserPatch, now: OffsetDateTime) {
        if let Some(hash) = &patch.password_hash {
            self.password_hash = hash.clone();
        }
        if let Some(at) = patch.last_log_at {
            self.last_log_at = Some(at);
        }
        if let Some(challenge) = &patch.challenge {
            self.challenge = challenge.clone();
        }
        if let Some(v) = patch.is_activated {
            self.is_activated = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.existence {
            self.existence = v;
        }
        if let Some(op) = &patch.access_tokens {
            op.apply(&mut self.access_tokens);
        }
        if let Some(op) = &patch.fcm_tokens {
            op.apply(&mut self.fcm_tokens);
        }
        self.updated_at = now;
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id)
            .push_bind(self.name.clone())
            .push_bind(self.email.clone())
            .push_bind(self.phone.clone())
            .push_bind(self.password_hash.clone())
            .push_bind(self.avatar.clone())
            .push_bind(self.role_id)
            .push_bind(self.organization_id)
            .push_bind(self.access_tokens.clone())
            .push_bind(self.fcm_tokens.clone())
            .push_bind(self.last_log_at)
            .push_bind(self.challenge.as_ref().map(|c| c.code.clone()))
            .push_bind(self.challenge.as_ref().map(|c| c.expires_at))
            .push_bind(self.is_activated)
            .push_bind(self.is_approved)
            .push_bind(self.status)
            .push_bind(self.existence)
            .push_bind(self.created_by)
            .push_bind(self.created_at)
            .push_bind(self.updated_at);
    }

    fn bind_patch(patch: &UserPatch, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(hash) = &patch.password_hash {
            set.push("password_hash = ").push_bind_unseparated(hash.clone());
        }
        if let Some(at) = patch.last_log_at {
            set.push("last_log_at = ").push_bind_unseparated(at);
        }
        match &patch.challenge {
            Some(Some(c)) => {
                set.push("otp = ").push_bind_unseparated(c.code.clone());
                set.push("otp_expire_time = ").push_bind_unseparated(c.expires_at);
            }
            Some(None) => {
                set.push("otp = NULL");
                set.push("otp_expire_time = NULL");
            }
            None => {}
        }
        if let Some(v) = patch.is_activated {
            set.push("is_activated = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.status {
            set.push("status = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.existence {
            set.push("existence = ").push_bind_unseparated(v);
        }
        if let Some(op) = &patch.access_tokens {
            op.bind("access_tokens", set);
        }
        if let Some(op) = &patch.fcm_tokens {
            op.bind("fcm_tokens", set);
        }
    }
}

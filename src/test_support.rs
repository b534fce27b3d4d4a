//! Fixtures for unit tests: an `AppState` over in-memory collections with
//! handles kept for inspection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::jwt::TokenService;
use crate::auth::otp::{OtpSender, OtpService};
use crate::auth::password::hash_password;
use crate::auth::repo_types::{NewUser, User, UserField, UserPatch};
use crate::config::{AppConfig, JwtConfig, OtpConfig, StoreBackend};
use crate::organizations::{NewOrganization, Organization};
use crate::roles::permissions::{Permission, PermissionSet};
use crate::roles::repo_types::{NewRole, Role};
use crate::state::AppState;
use crate::storage::FileStore;
use crate::store::{memory::MemoryCollection, Collection, Filter, SetOp};

pub const PASSWORD: &str = "Secret1!pass";

#[derive(Default)]
pub struct RecordingStorage {
    pub stored: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: bool,
}

#[async_trait]
impl FileStore for RecordingStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.stored.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        if self.fail_delete {
            anyhow::bail!("disk on fire");
        }
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn file_url(&self, key: &str) -> String {
        format!("https://files.test/{key}")
    }
}

#[derive(Default)]
pub struct CapturingSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

#[async_trait]
impl OtpSender for CapturingSender {
    async fn send(&self, destination: &str, code: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp unreachable");
        }
        self.sent.lock().unwrap().push((destination.to_string(), code.to_string()));
        Ok(())
    }
}

impl CapturingSender {
    pub fn last_code(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, code)| code.clone())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        store: StoreBackend::Memory,
        database_url: None,
        jwt: JwtConfig {
            secret: Some("test-secret".into()),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
        },
        otp: OtpConfig {
            ttl_minutes: 5,
            length: 4,
            expose_in_response: true,
        },
        minio: None,
        uploads_folder: "./storages".into(),
        base_url: "http://localhost:8080".into(),
    }
}

pub struct SeedUser {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub activated: bool,
    pub approved: bool,
    pub permissions: PermissionSet,
}

impl SeedUser {
    pub fn active(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            phone: None,
            activated: true,
            approved: true,
            permissions: PermissionSet::empty()
                .with(Permission::ReadRole)
                .with(Permission::ReadOrganization),
        }
    }

    pub fn pending(email: &str) -> Self {
        Self {
            activated: false,
            ..Self::active(email)
        }
    }

    pub fn phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn granting(mut self, permission: Permission) -> Self {
        self.permissions = self.permissions.with(permission);
        self
    }
}

pub struct Seeded {
    pub user: User,
    pub role: Role,
}

pub struct TestEnv {
    pub state: AppState,
    pub users: Arc<MemoryCollection<User>>,
    pub roles: Arc<MemoryCollection<Role>>,
    pub organizations: Arc<MemoryCollection<Organization>>,
    pub storage: Arc<RecordingStorage>,
    pub sender: Arc<CapturingSender>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(test_config(), RecordingStorage::default(), CapturingSender::default())
    }

    pub fn with(config: AppConfig, storage: RecordingStorage, sender: CapturingSender) -> Self {
        let users = Arc::new(MemoryCollection::new());
        let roles = Arc::new(MemoryCollection::new());
        let organizations = Arc::new(MemoryCollection::new());
        let storage = Arc::new(storage);
        let sender = Arc::new(sender);
        let state = AppState {
            tokens: Arc::new(TokenService::new(&config.jwt)),
            otp: Arc::new(OtpService::new(&config.otp)),
            config: Arc::new(config),
            users: users.clone(),
            roles: roles.clone(),
            organizations: organizations.clone(),
            storage: storage.clone(),
            otp_sender: sender.clone(),
        };
        Self {
            state,
            users,
            roles,
            organizations,
            storage,
            sender,
        }
    }

    pub async fn seed_role(&self, name: &str, permissions: PermissionSet) -> Role {
        self.roles
            .create(NewRole {
                name: name.to_string(),
                permissions,
                created_by: None,
            })
            .await
            .unwrap()
    }

    pub async fn seed_org(&self) -> Organization {
        self.organizations
            .create(NewOrganization {
                name: "Acme".into(),
                country: Some("BD".into()),
                region: None,
            })
            .await
            .unwrap()
    }

    /// A user with its own role, password [`PASSWORD`].
    pub async fn seed_user(&self, seed: SeedUser) -> Seeded {
        let role_name = format!("member-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let role = self.seed_role(&role_name, seed.permissions).await;
        let user = self
            .users
            .create(NewUser {
                name: Some("Seeded".into()),
                email: seed.email,
                phone: seed.phone,
                password_hash: hash_password(PASSWORD).unwrap(),
                role_id: Some(role.id),
                is_activated: seed.activated,
                is_approved: seed.approved,
                ..NewUser::default()
            })
            .await
            .unwrap();
        Seeded { user, role }
    }

    /// Issues a token for `user` and records it as a live session.
    pub async fn login_token(&self, user: &User) -> String {
        let token = self
            .state
            .tokens
            .issue(user.id, user.role_id, user.name.as_deref(), OffsetDateTime::now_utc())
            .unwrap();
        self.add_token(user.id, &token).await;
        token
    }

    pub async fn add_token(&self, user_id: Uuid, token: &str) {
        self.users
            .update_one(
                Filter::eq(UserField::Id, user_id).into(),
                UserPatch::default().access_tokens(SetOp::Add(token.to_string())),
            )
            .await
            .unwrap();
    }

    pub async fn remove_token(&self, user_id: Uuid, token: &str) {
        self.users
            .update_one(
                Filter::eq(UserField::Id, user_id).into(),
                UserPatch::default().access_tokens(SetOp::Remove(token.to_string())),
            )
            .await
            .unwrap();
    }

    pub async fn reload(&self, user_id: Uuid) -> User {
        self.users
            .find_one(crate::store::Query::new(Filter::eq(UserField::Id, user_id)).including_deleted())
            .await
            .unwrap()
            .unwrap()
    }
}

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::auth::jwt::TokenService;
use crate::auth::otp::{LogSender, OtpSender, OtpService};
use crate::auth::repo_types::User;
use crate::config::{AppConfig, StoreBackend};
use crate::organizations::Organization;
use crate::roles::repo_types::Role;
use crate::storage::{FileStore, LocalStorage, S3Storage};
use crate::store::{memory::MemoryCollection, pg::PgCollection, Collection};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn Collection<User>>,
    pub roles: Arc<dyn Collection<Role>>,
    pub organizations: Arc<dyn Collection<Organization>>,
    pub storage: Arc<dyn FileStore>,
    pub tokens: Arc<TokenService>,
    pub otp: Arc<OtpService>,
    pub otp_sender: Arc<dyn OtpSender>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (users, roles, organizations): (
            Arc<dyn Collection<User>>,
            Arc<dyn Collection<Role>>,
            Arc<dyn Collection<Organization>>,
        ) = match (config.store, config.database_url.as_deref()) {
            (StoreBackend::Postgres, Some(url)) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                run_migrations(&db).await;
                (
                    Arc::new(PgCollection::new(db.clone())),
                    Arc::new(PgCollection::new(db.clone())),
                    Arc::new(PgCollection::new(db)),
                )
            }
            (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is not set"),
            (StoreBackend::Memory, _) => {
                warn!("using the in-memory store; data is lost on restart");
                (
                    Arc::new(MemoryCollection::new()),
                    Arc::new(MemoryCollection::new()),
                    Arc::new(MemoryCollection::new()),
                )
            }
        };

        let storage: Arc<dyn FileStore> = match &config.minio {
            Some(minio) => Arc::new(S3Storage::new(minio).await?),
            None => {
                info!(folder = %config.uploads_folder, "storing uploads on local disk");
                Arc::new(LocalStorage::new(&config.uploads_folder, &config.base_url))
            }
        };

        if config.jwt.secret.is_none() {
            warn!("JWT_SECRET is not set; logins and signups will fail");
        }

        Ok(Self {
            tokens: Arc::new(TokenService::new(&config.jwt)),
            otp: Arc::new(OtpService::new(&config.otp)),
            otp_sender: Arc::new(LogSender),
            config,
            users,
            roles,
            organizations,
            storage,
        })
    }
}

async fn run_migrations(db: &PgPool) {
    if let Err(e) = sqlx::migrate!("./migrations").run(db).await {
        warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }
}

use std::net::SocketAddr;

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Absent secret is tolerated at startup; issuing a token then fails.
    pub secret: Option<String>,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_minutes: i64,
    pub length: u32,
    /// Echo the code in `meta.otp` (local testing only).
    pub expose_in_response: bool,
}

#[derive(Debug, Clone)]
pub struct MinioConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub minio: Option<MinioConfig>,
    pub uploads_folder: String,
    pub base_url: String,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid APP_HOST {:?}", self.host))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let store = match var_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("unknown STORE_BACKEND {other:?}"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            issuer: var_or("JWT_ISSUER", "accessgate"),
            audience: var_or("JWT_AUDIENCE", "accessgate-users"),
        };

        let otp = OtpConfig {
            ttl_minutes: parsed_or("OTP_EXPIRE_TIME", 5i64).max(1),
            length: parsed_or("OTP_LENGTH", 4u32).clamp(4, 6),
            expose_in_response: parsed_or("OTP_EXPOSE_IN_RESPONSE", false),
        };

        let minio = match std::env::var("MINIO_ENDPOINT") {
            Ok(endpoint) => Some(MinioConfig {
                endpoint,
                bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY")?,
                region: var_or("MINIO_REGION", "us-east-1"),
            }),
            Err(_) => None,
        };

        Ok(Self {
            host: var_or("APP_HOST", "0.0.0.0"),
            port: parsed_or("APP_PORT", 8080u16),
            store,
            database_url,
            jwt,
            otp,
            minio,
            uploads_folder: var_or("UPLOADS_FOLDER", "./storages"),
            base_url: var_or("BASE_URL", "http://localhost:8080"),
        })
    }
}

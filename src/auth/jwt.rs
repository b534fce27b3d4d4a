use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::config::JwtConfig;

/// Fixed validity window of a session token.
pub const TOKEN_TTL: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("JWT signing key is not configured")]
    MissingKey,
    #[error("token signature or claims are invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Signs and checks session tokens. Whether a token is still usable also
/// depends on the user's stored token set, which this type never reads.
pub struct TokenService {
    keys: Option<Keys>,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        let keys = cfg.secret.as_ref().map(|secret| Keys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        });
        Self {
            keys,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    fn keys(&self) -> Result<&Keys, TokenError> {
        self.keys.as_ref().ok_or(TokenError::MissingKey)
    }

    /// Same inputs give the same token.
    pub fn issue(
        &self,
        user_id: Uuid,
        role_id: Option<Uuid>,
        name: Option<&str>,
        issued_at: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let keys = self.keys()?;
        let claims = Claims {
            sub: user_id,
            role: role_id,
            name: name.map(str::to_string),
            log_at: issued_at.unix_timestamp(),
            iat: issued_at.unix_timestamp() as usize,
            exp: (issued_at + TOKEN_TTL).unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|_| TokenError::InvalidSignature)?;
        debug!(%user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let keys = self.keys()?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &keys.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::InvalidSignature,
        })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

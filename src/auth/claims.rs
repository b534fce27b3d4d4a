use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,             // user ID
    pub role: Option<Uuid>,    // role at issue time; the live role is reloaded per request
    pub name: Option<String>,  // display name
    pub log_at: i64,           // login instant (unix timestamp)
    pub iat: usize,            // issued at
    pub exp: usize,            // expires at
    pub iss: String,
    pub aud: String,
}

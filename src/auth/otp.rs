use async_trait::async_trait;
use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::auth::repo_types::User;
use crate::config::OtpConfig;

/// A pending one-time code and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub code: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    #[error("You have already requested an OTP. Please wait for {minutes} minutes and try again")]
    Pending { minutes: i64 },
    #[error("The OTP you entered has expired. Please request a new one")]
    Expired,
    #[error("The OTP you entered is incorrect. Please try again")]
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct OtpService {
    ttl: Duration,
    length: u32,
}

impl OtpService {
    pub fn new(cfg: &OtpConfig) -> Self {
        Self {
            ttl: Duration::minutes(cfg.ttl_minutes),
            length: cfg.length.clamp(4, 6),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.whole_minutes()
    }

    /// Uniformly random numeric code with exactly `length` digits.
    pub fn generate(&self) -> String {
        let low = 10u32.pow(self.length - 1);
        let high = 10u32.pow(self.length);
        OsRng.gen_range(low..high).to_string()
    }

    /// Fails while the user still has an unexpired code outstanding.
    pub fn issue_challenge(&self, user: &User, now: OffsetDateTime) -> Result<OtpChallenge, OtpError> {
        if let Some(pending) = &user.challenge {
            if pending.expires_at > now {
                return Err(OtpError::Pending {
                    minutes: self.ttl_minutes(),
                });
            }
        }
        Ok(OtpChallenge {
            code: self.generate(),
            expires_at: now + self.ttl,
        })
    }

    /// A user with no pending code gets `Expired`: the previous one was
    /// either consumed or never requested.
    pub fn validate(&self, user: &User, submitted: &str, now: OffsetDateTime) -> Result<(), OtpError> {
        let challenge = user.challenge.as_ref().ok_or(OtpError::Expired)?;
        if now > challenge.expires_at {
            return Err(OtpError::Expired);
        }
        if challenge.code != submitted.trim() {
            return Err(OtpError::Mismatch);
        }
        Ok(())
    }
}

/// Out-of-band channel for one-time codes (mail, SMS).
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, destination: &str, code: &str) -> anyhow::Result<()>;
}

/// Default sender: records that a code went out, never the code itself.
pub struct LogSender;

#[async_trait]
impl OtpSender for LogSender {
    async fn send(&self, destination: &str, _code: &str) -> anyhow::Result<()> {
        info!(%destination, "otp dispatched");
        Ok(())
    }
}

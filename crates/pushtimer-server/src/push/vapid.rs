//! VAPID application-server identity (RFC 8292).

use std::fmt;
use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::warn;

use pushtimer_core::config::VapidConfig;

use super::PushError;

/// Lifetime of a signed VAPID token.
const TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum VapidError {
    #[error("failed to read VAPID private key {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid VAPID private key: {0}")]
    InvalidKey(String),
}

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signing material for VAPID authorisation headers.
#[derive(Clone)]
pub struct VapidKeys {
    subject: String,
    public_key: String,
    signing_key: EncodingKey,
}

impl fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeys")
            .field("subject", &self.subject)
            .field("public_key", &self.public_key)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl VapidKeys {
    /// Build keys from a PKCS#8 PEM-encoded P-256 private key.
    pub fn from_pem(
        subject: impl Into<String>,
        public_key: impl Into<String>,
        private_key_pem: &[u8],
    ) -> Result<Self, VapidError> {
        let signing_key = EncodingKey::from_ec_pem(private_key_pem)
            .map_err(|e| VapidError::InvalidKey(e.to_string()))?;
        Ok(Self {
            subject: subject.into(),
            public_key: public_key.into(),
            signing_key,
        })
    }

    /// Load keys described by `config`.
    ///
    /// Returns `Ok(None)` when the configuration is incomplete; deliveries
    /// then fail with a configuration error. A key file that exists but
    /// cannot be read or parsed is an error.
    pub fn from_config(config: &VapidConfig) -> Result<Option<Self>, VapidError> {
        let (Some(subject), Some(public_key), Some(path)) = (
            config.subject.as_deref(),
            config.public_key.as_deref(),
            config.private_key_path.as_deref(),
        ) else {
            if config.subject.is_some()
                || config.public_key.is_some()
                || config.private_key_path.is_some()
            {
                warn!("Incomplete VAPID configuration; deliveries will fail until all keys are set");
            }
            return Ok(None);
        };

        let pem = read_key_file(path)?;
        Self::from_pem(subject, public_key, &pem).map(Some)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a token for the push service at `audience` (an origin).
    pub fn sign(&self, audience: &str, now_secs: i64) -> Result<String, PushError> {
        let claims = VapidClaims {
            aud: audience,
            exp: now_secs + TOKEN_TTL_SECS,
            sub: &self.subject,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.signing_key)
            .map_err(|e| PushError::Signing(e.to_string()))
    }

    /// `Authorization` header value for a push service at `audience`.
    pub fn authorization(&self, audience: &str, now_secs: i64) -> Result<String, PushError> {
        let token = self.sign(audience, now_secs)?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, VapidError> {
    std::fs::read(path).map_err(|e| VapidError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

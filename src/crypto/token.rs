//! Short-lived ES256 authentication tokens.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::keys::SigningKey;
use crate::core::{CredentialError, TOKEN_VALIDITY_MINUTES};

/// JWT claims presented to `/auth/jwt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Device identity.
    pub sub: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Signs tokens binding a device identity to an expiry.
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    validity: Duration,
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self {
            validity: Duration::minutes(TOKEN_VALIDITY_MINUTES),
        }
    }
}

impl TokenIssuer {
    /// Issuer with the standard ten-minute validity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token lifetime.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issue a token for `subject`, valid from `now` for [`Self::validity`].
    ///
    /// Times are truncated to whole seconds. Only the subject and expiry are
    /// logged.
    pub fn issue(
        &self,
        subject: &str,
        key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<AuthToken, CredentialError> {
        if subject.is_empty() {
            return Err(CredentialError::EmptyIdentity);
        }

        let issued_at = now.timestamp();
        let expires_at = now
            .checked_add_signed(self.validity)
            .ok_or(CredentialError::ExpiryOutOfRange)?
            .timestamp();

        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at,
            exp: expires_at,
        };

        let encoding_key = key.encoding_key()?;
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &encoding_key)
            .map_err(CredentialError::Signing)?;

        let issued_at =
            DateTime::from_timestamp(issued_at, 0).ok_or(CredentialError::ExpiryOutOfRange)?;
        let expires_at =
            DateTime::from_timestamp(expires_at, 0).ok_or(CredentialError::ExpiryOutOfRange)?;

        debug!(subject, expires_at = %expires_at, "issued auth token");

        Ok(AuthToken {
            token,
            subject: claims.sub,
            issued_at,
            expires_at,
        })
    }
}

/// A signed compact JWS, used once as the body of the auth request.
///
/// Neither `Debug` nor `Display` reveals the token text.
pub struct AuthToken {
    token: String,
    subject: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Credential subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// `iat` claim.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// `exp` claim.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Compact serialization.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Consume the token into a request body.
    pub fn into_body(self) -> Vec<u8> {
        self.token.into_bytes()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token for {} (expires {})", self.subject, self.expires_at)
    }
}

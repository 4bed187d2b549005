//! Token verification.
//!
//! The connection service treats verification as a black box behind the
//! [`TokenVerifier`] trait. [`JwtManager`] is the HS256 implementation used by
//! the Hearth server.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::RealtimeError;

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// JWT ID (unique identifier)
    pub jti: String,
    /// User role
    pub role: UserRole,
    /// Family the user is acting for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}

/// User role inside a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Family owner with full access
    Owner,
    /// Administrator who can manage members and documents
    Admin,
    /// Regular family member
    Member,
    /// Read-only access
    Viewer,
}

impl UserRole {
    /// Returns true if this role can change shared family data.
    #[must_use]
    pub const fn can_edit(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Member)
    }

    /// Returns true if this role can manage family members.
    #[must_use]
    pub const fn can_manage_members(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// Verifies a bearer token and returns its claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies `token`, returning its claims or an authentication error.
    async fn verify(&self, token: &str) -> Result<Claims, RealtimeError>;
}

/// JWT token manager.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiration_secs: i64,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_secs", &self.expiration_secs)
            .finish_non_exhaustive()
    }
}

impl JwtManager {
    /// Creates a new JWT manager from configuration.
    #[must_use]
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            expiration_secs: i64::try_from(config.expiration_secs).unwrap_or(i64::MAX),
        }
    }

    /// Generates a new JWT token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if token encoding fails.
    pub fn generate_token(
        &self,
        user_id: &str,
        role: UserRole,
        family_id: Option<String>,
    ) -> Result<String, RealtimeError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            role,
            family_id,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| RealtimeError::Internal(format!("Failed to generate token: {e}")))
    }

    /// Validates a JWT token and returns the claims.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_token` error if the token is malformed, expired or
    /// issued for another audience.
    pub fn validate_token(&self, token: &str) -> Result<Claims, RealtimeError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| RealtimeError::invalid_token(e))?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtManager {
    async fn verify(&self, token: &str) -> Result<Claims, RealtimeError> {
        self.validate_token(extract_bearer_token(token).unwrap_or(token))
    }
}

/// Extracts the bearer token from an Authorization header value.
#[must_use]
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

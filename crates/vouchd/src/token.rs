use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::{Store, StoreError, TokenRecord};

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("unknown token")]
    Unknown,
    #[error("token encoding failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The challenge id this token was issued for.
    pub sub: String,
    /// Issue time, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// A freshly issued token. The raw string exists only here and in the
/// HTTP response; storage sees its digest.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates signed bearer tokens.
///
/// Tokens are self-verifying (HS256 signature + embedded expiry) *and*
/// checked against the store, so the server can revoke them and a forged
/// record-less token never validates.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_minutes: i64,
    store: Store,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl_minutes: i64, store: Store) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock, not the system one.
        validation.validate_exp = false;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl_minutes,
            store,
        }
    }

    /// Sign a token for `subject` and persist its digest.
    pub async fn issue(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now + chrono::Duration::minutes(self.ttl_minutes);
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(TokenError::Encode)?;

        let record = TokenRecord {
            hash: hash_token(&token),
            subject: subject.to_string(),
            issued_at: now,
            expires_at,
            revoked: false,
        };
        self.store.insert_token(&record).await?;

        tracing::info!(subject, expires_at = %expires_at, "token issued");
        Ok(IssuedToken { token, expires_at })
    }

    /// Validate a bearer token: signature, expiry, then store record.
    pub async fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            })?;

        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        let record = self
            .store
            .get_token(&hash_token(token))
            .await?
            .ok_or(TokenError::Unknown)?;
        if record.revoked {
            return Err(TokenError::Revoked);
        }
        if now >= record.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }

    /// Revoke by digest. Operator tooling; no HTTP surface yet.
    #[allow(dead_code)]
    pub async fn revoke(&self, hash: &str) -> Result<bool, TokenError> {
        Ok(self.store.revoke_token(hash).await?)
    }
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

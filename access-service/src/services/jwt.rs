use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Principal, PrincipalKind};

const REFRESH_TOKEN_BYTES: usize = 64;

/// Issues HS256 access tokens and opaque refresh tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal id
    pub sub: String,
    pub email: String,
    /// Display name
    pub name: String,
    /// Principal kind; tokens are never valid for the other kind's routes
    pub kind: PrincipalKind,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Token pair returned to a client after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub principal_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer,
            audience: config.audience,
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    pub fn generate_access_token(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: principal.id.to_string(),
            email: principal.email.clone(),
            name: principal.display_name().to_string(),
            kind: principal.kind(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    /// 64 bytes from the OS RNG, base64 encoded. It has no structure; its
    /// only proof of validity is equality with what the store holds.
    pub fn generate_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }

    pub fn refresh_token_expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::days(self.refresh_token_expiry_days)
    }

    /// Verify signature, issuer, audience and expiry with zero leeway.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    /// Like `validate_access_token`, but also requires the token to have been
    /// minted for `kind`.
    pub fn validate_access_token_for(
        &self,
        token: &str,
        kind: PrincipalKind,
    ) -> Result<AccessTokenClaims, TokenRejection> {
        let claims = self
            .validate_access_token(token)
            .map_err(TokenRejection::Invalid)?;

        if claims.kind != kind {
            return Err(TokenRejection::WrongKind(claims.kind));
        }

        Ok(claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn token_response(
        &self,
        principal_id: Uuid,
        access_token: String,
        refresh_token: String,
    ) -> TokenResponse {
        TokenResponse {
            principal_id,
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        }
    }
}

#[derive(Debug)]
pub enum TokenRejection {
    Invalid(anyhow::Error),
    WrongKind(PrincipalKind),
}

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// An identity asserted by an external provider and checked by us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `Ok(None)` means the provider rejected the token.
    async fn verify(&self, id_token: &str) -> Result<Option<ExternalIdentity>, anyhow::Error>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: serde_json::Value,
    name: Option<String>,
}

impl TokenInfo {
    fn email_is_verified(&self) -> bool {
        match &self.email_verified {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s == "true",
            _ => false,
        }
    }
}

/// Validates Google ID tokens with the tokeninfo endpoint.
#[derive(Clone)]
pub struct GoogleTokenVerifier {
    client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleTokenVerifier {
    pub fn new(client_id: String) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            client_id,
            endpoint: GOOGLE_TOKENINFO_URL.to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for GoogleTokenVerifier {
    async fn verify(&self, id_token: &str) -> Result<Option<ExternalIdentity>, anyhow::Error> {
        if self.client_id.is_empty() {
            tracing::warn!("Google sign-in attempted but GOOGLE_CLIENT_ID is not configured");
            return Ok(None);
        }

        let res = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Google tokeninfo request failed: {}", e))?;

        if !res.status().is_success() {
            tracing::info!(status = %res.status(), "Google rejected ID token");
            return Ok(None);
        }

        let info: TokenInfo = res
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Google tokeninfo: {}", e))?;

        if info.aud != self.client_id {
            tracing::warn!("Google ID token issued for a different client");
            return Ok(None);
        }

        if !info.email_is_verified() {
            return Ok(None);
        }

        let Some(email) = info.email else {
            return Ok(None);
        };

        Ok(Some(ExternalIdentity {
            provider: "google".to_string(),
            name: info.name.unwrap_or_else(|| email.clone()),
            email,
        }))
    }
}

/// Accepts a fixed set of tokens. For tests and local runs.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    identities: HashMap<String, ExternalIdentity>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, identity: ExternalIdentity) -> Self {
        self.identities.insert(token.to_string(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, id_token: &str) -> Result<Option<ExternalIdentity>, anyhow::Error> {
        Ok(self.identities.get(id_token).cloned())
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Individual,
    Organization,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Individual => "individual",
            PrincipalKind::Organization => "organization",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(PrincipalKind::Individual),
            "organization" => Ok(PrincipalKind::Organization),
            _ => Err(format!("Invalid principal kind: {}", s)),
        }
    }
}

/// How a principal proves who they are. A principal has exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    External { provider: String },
}

impl Credential {
    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Credential::Password(hash) => Some(hash),
            Credential::External { .. } => None,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Credential::Password(_) => None,
            Credential::External { provider } => Some(provider),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    Individual {
        full_name: String,
    },
    Organization {
        company_name: String,
        contact_name: String,
    },
}

impl Profile {
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Profile::Individual { .. } => PrincipalKind::Individual,
            Profile::Organization { .. } => PrincipalKind::Organization,
        }
    }

    /// Name placed in the access token.
    pub fn display_name(&self) -> &str {
        match self {
            Profile::Individual { full_name } => full_name,
            Profile::Organization { company_name, .. } => company_name,
        }
    }

    /// Name used to address the principal in emails.
    pub fn greeting_name(&self) -> &str {
        match self {
            Profile::Individual { full_name } => full_name,
            Profile::Organization { contact_name, .. } => contact_name,
        }
    }
}

/// A one-time code and the moment it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

impl OneTimeCode {
    pub fn new(code: String, issued_at: DateTime<Utc>) -> Self {
        Self { code, issued_at }
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.code.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    /// Expired once strictly more than `window_minutes` have elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>, window_minutes: i64) -> bool {
        now - self.issued_at > Duration::minutes(window_minutes)
    }
}

/// The current refresh token, kept only as its SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRefreshToken {
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredRefreshToken {
    pub fn new(token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            hash: Self::hash_token(token),
            expires_at,
        }
    }

    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn matches(&self, presented: &str) -> bool {
        let presented = Self::hash_token(presented);
        self.hash.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub credential: Credential,
    pub profile: Profile,
    pub email_verified: bool,
    pub verification: Option<OneTimeCode>,
    pub password_reset: Option<OneTimeCode>,
    pub refresh_token: Option<StoredRefreshToken>,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(
        email: String,
        credential: Credential,
        profile: Profile,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            credential,
            profile,
            email_verified: false,
            verification: None,
            password_reset: None,
            refresh_token: None,
            created_at,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        self.profile.kind()
    }

    pub fn display_name(&self) -> &str {
        self.profile.display_name()
    }
}

//! PostgreSQL implementations of the store seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::store::{AccessRequestStore, CodeSlot, PrincipalStore, ResourceLocator, StoreError};
use crate::models::{
    AccessRequest, Credential, OneTimeCode, Principal, PrincipalKind, Profile, RequestStatus,
    ResourceRecord, StoredRefreshToken,
};

const PRINCIPAL_COLUMNS: &str = "id, kind, email, password_hash, auth_provider, full_name, \
     company_name, contact_name, email_verified, verification_code, verification_code_issued_at, \
     password_reset_code, password_reset_issued_at, refresh_token_hash, refresh_token_expires_at, \
     created_at";

const REQUEST_COLUMNS: &str = "id, requester_id, owner_email, resource_name, purpose, \
     duration_hours, status, requested_at, expires_at, resource_location";

fn backend(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("{}: {}", context, e))
}

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    id: Uuid,
    kind: String,
    email: String,
    password_hash: Option<String>,
    auth_provider: Option<String>,
    full_name: Option<String>,
    company_name: Option<String>,
    contact_name: Option<String>,
    email_verified: bool,
    verification_code: Option<String>,
    verification_code_issued_at: Option<DateTime<Utc>>,
    password_reset_code: Option<String>,
    password_reset_issued_at: Option<DateTime<Utc>>,
    refresh_token_hash: Option<String>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn one_time_code(code: Option<String>, issued_at: Option<DateTime<Utc>>) -> Option<OneTimeCode> {
    match (code, issued_at) {
        (Some(code), Some(issued_at)) => Some(OneTimeCode::new(code, issued_at)),
        _ => None,
    }
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let kind: PrincipalKind = row
            .kind
            .parse()
            .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;

        let credential = match (row.password_hash, row.auth_provider) {
            (Some(hash), None) => Credential::Password(hash),
            (None, Some(provider)) => Credential::External { provider },
            _ => {
                return Err(StoreError::Backend(anyhow::anyhow!(
                    "principal {} has an inconsistent credential",
                    row.id
                )))
            }
        };

        let profile = match kind {
            PrincipalKind::Individual => Profile::Individual {
                full_name: row.full_name.unwrap_or_default(),
            },
            PrincipalKind::Organization => Profile::Organization {
                company_name: row.company_name.unwrap_or_default(),
                contact_name: row.contact_name.unwrap_or_default(),
            },
        };

        let refresh_token = match (row.refresh_token_hash, row.refresh_token_expires_at) {
            (Some(hash), Some(expires_at)) => Some(StoredRefreshToken { hash, expires_at }),
            _ => None,
        };

        Ok(Principal {
            id: row.id,
            email: row.email,
            credential,
            profile,
            email_verified: row.email_verified,
            verification: one_time_code(row.verification_code, row.verification_code_issued_at),
            password_reset: one_time_code(row.password_reset_code, row.password_reset_issued_at),
            refresh_token,
            created_at: row.created_at,
        })
    }
}

struct ProfileColumns<'a> {
    full_name: Option<&'a str>,
    company_name: Option<&'a str>,
    contact_name: Option<&'a str>,
}

fn profile_columns(profile: &Profile) -> ProfileColumns<'_> {
    match profile {
        Profile::Individual { full_name } => ProfileColumns {
            full_name: Some(full_name),
            company_name: None,
            contact_name: None,
        },
        Profile::Organization {
            company_name,
            contact_name,
        } => ProfileColumns {
            full_name: None,
            company_name: Some(company_name),
            contact_name: Some(contact_name),
        },
    }
}

#[derive(Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes every mutable column except the refresh token. With a guard the
    /// row only matches while `column` still holds the expected value.
    async fn write_principal(
        &self,
        principal: &Principal,
        guard: Option<(&str, &str)>,
    ) -> Result<u64, StoreError> {
        let profile = profile_columns(&principal.profile);
        let condition = match guard {
            Some((column, _)) => format!(" AND {} = $13", column),
            None => String::new(),
        };
        let sql = format!(
            r#"
            UPDATE principals
            SET password_hash = $3,
                auth_provider = $4,
                full_name = $5,
                company_name = $6,
                contact_name = $7,
                email_verified = $8,
                verification_code = $9,
                verification_code_issued_at = $10,
                password_reset_code = $11,
                password_reset_issued_at = $12
            WHERE id = $1 AND kind = $2{}
            "#,
            condition
        );

        let mut query = sqlx::query(&sql)
            .bind(principal.id)
            .bind(principal.kind().as_str())
            .bind(principal.credential.password_hash())
            .bind(principal.credential.provider())
            .bind(profile.full_name)
            .bind(profile.company_name)
            .bind(profile.contact_name)
            .bind(principal.email_verified)
            .bind(principal.verification.as_ref().map(|c| c.code.as_str()))
            .bind(principal.verification.as_ref().map(|c| c.issued_at))
            .bind(principal.password_reset.as_ref().map(|c| c.code.as_str()))
            .bind(principal.password_reset.as_ref().map(|c| c.issued_at));
        if let Some((_, expected)) = guard {
            query = query.bind(expected);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Failed to update principal", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    #[instrument(skip(self))]
    async fn find_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let query = format!(
            "SELECT {} FROM principals WHERE kind = $1 AND email = $2",
            PRINCIPAL_COLUMNS
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&query)
            .bind(kind.as_str())
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to find principal by email", e))?;

        row.map(Principal::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_id(
        &self,
        kind: PrincipalKind,
        id: Uuid,
    ) -> Result<Option<Principal>, StoreError> {
        let query = format!(
            "SELECT {} FROM principals WHERE kind = $1 AND id = $2",
            PRINCIPAL_COLUMNS
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&query)
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to find principal by id", e))?;

        row.map(Principal::try_from).transpose()
    }

    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    async fn insert(&self, principal: &Principal) -> Result<(), StoreError> {
        let profile = profile_columns(&principal.profile);
        let refresh = principal.refresh_token.as_ref();

        sqlx::query(
            r#"
            INSERT INTO principals (
                id, kind, email, password_hash, auth_provider, full_name, company_name,
                contact_name, email_verified, verification_code, verification_code_issued_at,
                password_reset_code, password_reset_issued_at, refresh_token_hash,
                refresh_token_expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(principal.id)
        .bind(principal.kind().as_str())
        .bind(&principal.email)
        .bind(principal.credential.password_hash())
        .bind(principal.credential.provider())
        .bind(profile.full_name)
        .bind(profile.company_name)
        .bind(profile.contact_name)
        .bind(principal.email_verified)
        .bind(principal.verification.as_ref().map(|c| c.code.as_str()))
        .bind(principal.verification.as_ref().map(|c| c.issued_at))
        .bind(principal.password_reset.as_ref().map(|c| c.code.as_str()))
        .bind(principal.password_reset.as_ref().map(|c| c.issued_at))
        .bind(refresh.map(|t| t.hash.as_str()))
        .bind(refresh.map(|t| t.expires_at))
        .bind(principal.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict
            }
            _ => backend("Failed to insert principal", e),
        })?;

        Ok(())
    }

    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        self.write_principal(principal, None).await?;
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn set_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        token: Option<&StoredRefreshToken>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE principals
            SET refresh_token_hash = $3, refresh_token_expires_at = $4
            WHERE id = $1 AND kind = $2
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(token.map(|t| t.hash.as_str()))
        .bind(token.map(|t| t.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to store refresh token", e))?;

        Ok(())
    }

    #[instrument(skip(self, expected_hash, next))]
    async fn rotate_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        expected_hash: &str,
        next: &StoredRefreshToken,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET refresh_token_hash = $4, refresh_token_expires_at = $5
            WHERE id = $1 AND kind = $2 AND refresh_token_hash = $3
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(expected_hash)
        .bind(&next.hash)
        .bind(next.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to rotate refresh token", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, principal, expected), fields(principal_id = %principal.id))]
    async fn consume_code(
        &self,
        principal: &Principal,
        slot: CodeSlot,
        expected: &str,
    ) -> Result<bool, StoreError> {
        let column = match slot {
            CodeSlot::Verification => "verification_code",
            CodeSlot::PasswordReset => "password_reset_code",
        };
        let written = self
            .write_principal(principal, Some((column, expected)))
            .await?;
        Ok(written == 1)
    }
}

#[derive(sqlx::FromRow)]
struct AccessRequestRow {
    id: Uuid,
    requester_id: Uuid,
    owner_email: String,
    resource_name: String,
    purpose: String,
    duration_hours: i64,
    status: String,
    requested_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    resource_location: Option<String>,
}

impl TryFrom<AccessRequestRow> for AccessRequest {
    type Error = StoreError;

    fn try_from(row: AccessRequestRow) -> Result<Self, Self::Error> {
        let status: RequestStatus = row
            .status
            .parse()
            .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;

        Ok(AccessRequest {
            id: row.id,
            requester_id: row.requester_id,
            owner_email: row.owner_email,
            resource_name: row.resource_name,
            purpose: row.purpose,
            duration_hours: row.duration_hours,
            status,
            requested_at: row.requested_at,
            expires_at: row.expires_at,
            resource_location: row.resource_location,
        })
    }
}

#[derive(Clone)]
pub struct PgAccessRequestStore {
    pool: PgPool,
}

impl PgAccessRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        column: &str,
        bind: ListKey<'_>,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        let query = format!(
            "SELECT {} FROM access_requests WHERE {} = $1 ORDER BY requested_at DESC",
            REQUEST_COLUMNS, column
        );
        let rows = match bind {
            ListKey::Email(email) => {
                sqlx::query_as::<_, AccessRequestRow>(&query)
                    .bind(email)
                    .fetch_all(&self.pool)
                    .await
            }
            ListKey::Id(id) => {
                sqlx::query_as::<_, AccessRequestRow>(&query)
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| backend("Failed to list access requests", e))?;

        rows.into_iter().map(AccessRequest::try_from).collect()
    }
}

enum ListKey<'a> {
    Email(&'a str),
    Id(Uuid),
}

#[async_trait]
impl AccessRequestStore for PgAccessRequestStore {
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    async fn insert(&self, request: &AccessRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO access_requests (
                id, requester_id, owner_email, resource_name, purpose, duration_hours,
                status, requested_at, expires_at, resource_location
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(request.requester_id)
        .bind(&request.owner_email)
        .bind(&request.resource_name)
        .bind(&request.purpose)
        .bind(request.duration_hours)
        .bind(request.status.as_str())
        .bind(request.requested_at)
        .bind(request.expires_at)
        .bind(request.resource_location.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict
            }
            _ => backend("Failed to insert access request", e),
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError> {
        let query = format!("SELECT {} FROM access_requests WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query_as::<_, AccessRequestRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to find access request", e))?;

        row.map(AccessRequest::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_owner(&self, owner_email: &str) -> Result<Vec<AccessRequest>, StoreError> {
        self.list_where("owner_email", ListKey::Email(owner_email))
            .await
    }

    #[instrument(skip(self))]
    async fn list_by_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        self.list_where("requester_id", ListKey::Id(requester_id))
            .await
    }

    #[instrument(skip(self, decided), fields(request_id = %decided.id))]
    async fn resolve(&self, decided: &AccessRequest) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE access_requests
            SET status = $2, expires_at = $3, resource_location = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(decided.id)
        .bind(decided.status.as_str())
        .bind(decided.expires_at)
        .bind(decided.resource_location.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to resolve access request", e))?;

        Ok(result.rows_affected() == 1)
    }
}

/// Looks resources up in the `documents` table.
#[derive(Clone)]
pub struct PgResourceLocator {
    pool: PgPool,
}

impl PgResourceLocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceLocator for PgResourceLocator {
    #[instrument(skip(self))]
    async fn find_resource(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> Result<Option<ResourceRecord>, anyhow::Error> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT file_name, file_url
            FROM documents
            WHERE owner_id = $1 AND file_name = $2
            ORDER BY uploaded_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up document: {}", e))?;

        Ok(row.map(|(name, location)| ResourceRecord { name, location }))
    }
}

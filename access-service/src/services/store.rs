//! Persistence seams consumed by the credential and ledger services.
//!
//! Every check-then-write that can race (refresh rotation, consuming a
//! one-time code, deciding a request) is exposed as a single conditional operation so the backing
//! store can perform it atomically.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccessRequest, Principal, PrincipalKind, ResourceRecord, StoredRefreshToken};

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Record already exists")]
    Conflict,

    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Which one-time code a conditional write is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSlot {
    Verification,
    PasswordReset,
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, kind: PrincipalKind, id: Uuid)
        -> Result<Option<Principal>, StoreError>;

    /// Fails with `StoreError::Conflict` when the email is taken for this kind.
    async fn insert(&self, principal: &Principal) -> Result<(), StoreError>;

    /// Persist profile, credential, verification and reset state. The refresh
    /// token is left alone; see `set_refresh_token` and `rotate_refresh_token`.
    async fn update(&self, principal: &Principal) -> Result<(), StoreError>;

    /// Unconditionally replace (or clear) the stored refresh token.
    async fn set_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        token: Option<&StoredRefreshToken>,
    ) -> Result<(), StoreError>;

    /// Replace the refresh token only if the stored digest is still
    /// `expected_hash`. Returns `false` when another caller rotated first.
    async fn rotate_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        expected_hash: &str,
        next: &StoredRefreshToken,
    ) -> Result<bool, StoreError>;

    /// Like `update`, but only while the stored code in `slot` still equals
    /// `expected`. Returns `false` when another caller consumed it first.
    async fn consume_code(
        &self,
        principal: &Principal,
        slot: CodeSlot,
        expected: &str,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AccessRequestStore: Send + Sync {
    async fn insert(&self, request: &AccessRequest) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError>;

    /// Newest first.
    async fn list_by_owner(&self, owner_email: &str) -> Result<Vec<AccessRequest>, StoreError>;

    /// Newest first.
    async fn list_by_requester(&self, requester_id: Uuid)
        -> Result<Vec<AccessRequest>, StoreError>;

    /// Write `decided` only if the stored record is still pending. Returns
    /// `false` when a decision was already committed.
    async fn resolve(&self, decided: &AccessRequest) -> Result<bool, StoreError>;
}

/// Resolves a resource name under an owner to where it can be fetched.
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    async fn find_resource(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> Result<Option<ResourceRecord>, anyhow::Error>;
}

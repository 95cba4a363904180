//! In-process stores for tests and local runs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::store::{AccessRequestStore, CodeSlot, PrincipalStore, ResourceLocator, StoreError};
use crate::models::{
    AccessRequest, Principal, PrincipalKind, RequestStatus, ResourceRecord, StoredRefreshToken,
};

#[derive(Default)]
pub struct InMemoryPrincipalStore {
    principals: DashMap<Uuid, Principal>,
    emails: DashMap<(PrincipalKind, String), Uuid>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let id = match self.emails.get(&(kind, email.to_string())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.principals.get(&id).map(|p| p.value().clone()))
    }

    async fn find_by_id(
        &self,
        kind: PrincipalKind,
        id: Uuid,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .principals
            .get(&id)
            .filter(|p| p.kind() == kind)
            .map(|p| p.value().clone()))
    }

    async fn insert(&self, principal: &Principal) -> Result<(), StoreError> {
        match self.emails.entry((principal.kind(), principal.email.clone())) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                self.principals.insert(principal.id, principal.clone());
                slot.insert(principal.id);
                Ok(())
            }
        }
    }

    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut stored = self
            .principals
            .get_mut(&principal.id)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("principal {} missing", principal.id)))?;

        let refresh_token = stored.refresh_token.take();
        *stored = principal.clone();
        stored.refresh_token = refresh_token;
        Ok(())
    }

    async fn set_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        token: Option<&StoredRefreshToken>,
    ) -> Result<(), StoreError> {
        match self.principals.get_mut(&id) {
            Some(mut stored) if stored.kind() == kind => {
                stored.refresh_token = token.cloned();
                Ok(())
            }
            _ => Err(StoreError::Backend(anyhow::anyhow!("principal {} missing", id))),
        }
    }

    async fn rotate_refresh_token(
        &self,
        kind: PrincipalKind,
        id: Uuid,
        expected_hash: &str,
        next: &StoredRefreshToken,
    ) -> Result<bool, StoreError> {
        // The shard write lock makes the compare and the swap one step.
        let Some(mut stored) = self.principals.get_mut(&id) else {
            return Ok(false);
        };
        if stored.kind() != kind {
            return Ok(false);
        }
        let current = stored
            .refresh_token
            .as_ref()
            .is_some_and(|token| token.hash == expected_hash);
        if !current {
            return Ok(false);
        }
        stored.refresh_token = Some(next.clone());
        Ok(true)
    }

    async fn consume_code(
        &self,
        principal: &Principal,
        slot: CodeSlot,
        expected: &str,
    ) -> Result<bool, StoreError> {
        let Some(mut stored) = self.principals.get_mut(&principal.id) else {
            return Ok(false);
        };
        if stored.kind() != principal.kind() {
            return Ok(false);
        }
        let code = match slot {
            CodeSlot::Verification => &stored.verification,
            CodeSlot::PasswordReset => &stored.password_reset,
        };
        if !code.as_ref().is_some_and(|c| c.matches(expected)) {
            return Ok(false);
        }

        let refresh_token = stored.refresh_token.take();
        *stored = principal.clone();
        stored.refresh_token = refresh_token;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryAccessRequestStore {
    requests: DashMap<Uuid, AccessRequest>,
}

impl InMemoryAccessRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, keep: F) -> Vec<AccessRequest>
    where
        F: Fn(&AccessRequest) -> bool,
    {
        let mut found: Vec<AccessRequest> = self
            .requests
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        found
    }
}

#[async_trait]
impl AccessRequestStore for InMemoryAccessRequestStore {
    async fn insert(&self, request: &AccessRequest) -> Result<(), StoreError> {
        match self.requests.entry(request.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn list_by_owner(&self, owner_email: &str) -> Result<Vec<AccessRequest>, StoreError> {
        Ok(self.collect(|r| r.owner_email == owner_email))
    }

    async fn list_by_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        Ok(self.collect(|r| r.requester_id == requester_id))
    }

    async fn resolve(&self, decided: &AccessRequest) -> Result<bool, StoreError> {
        let Some(mut stored) = self.requests.get_mut(&decided.id) else {
            return Ok(false);
        };
        if stored.status != RequestStatus::Pending {
            return Ok(false);
        }
        *stored = decided.clone();
        Ok(true)
    }
}

/// Resource registry keyed by owner and file name.
#[derive(Default)]
pub struct InMemoryResourceLocator {
    resources: DashMap<(Uuid, String), String>,
}

impl InMemoryResourceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, owner_id: Uuid, name: &str, location: &str) {
        self.resources
            .insert((owner_id, name.to_string()), location.to_string());
    }

    pub fn remove(&self, owner_id: Uuid, name: &str) {
        self.resources.remove(&(owner_id, name.to_string()));
    }
}

#[async_trait]
impl ResourceLocator for InMemoryResourceLocator {
    async fn find_resource(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> Result<Option<ResourceRecord>, anyhow::Error> {
        Ok(self
            .resources
            .get(&(owner_id, name.to_string()))
            .map(|location| ResourceRecord {
                name: name.to_string(),
                location: location.value().clone(),
            }))
    }
}

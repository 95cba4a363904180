//! The access-request state machine: Pending -> Approved | Declined.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::email::{templates, Notifier};
use super::error::ServiceError;
use super::store::{AccessRequestStore, PrincipalStore, ResourceLocator};
use crate::models::{
    AccessRequest, AccessRequestView, Decision, Principal, PrincipalKind, Profile, RequestStatus,
    MAX_DURATION_HOURS,
};
use crate::utils::Clock;

const UNKNOWN_REQUESTER: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct NewAccessRequest {
    pub owner_email: String,
    pub resource_name: String,
    pub purpose: String,
    pub duration_hours: i64,
}

/// Who is deciding a request.
#[derive(Debug, Clone)]
pub enum Actor {
    /// The individual named on the request, identified by token email.
    Owner { email: String },
    /// Operator override; still bound by the state machine.
    Administrator,
}

/// A currently exercisable grant.
#[derive(Debug, Clone, Serialize)]
pub struct Grant {
    pub request_id: Uuid,
    pub resource_name: String,
    pub resource_location: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AccessLedger {
    requests: Arc<dyn AccessRequestStore>,
    principals: Arc<dyn PrincipalStore>,
    locator: Arc<dyn ResourceLocator>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    default_duration_hours: i64,
}

impl AccessLedger {
    pub fn new(
        requests: Arc<dyn AccessRequestStore>,
        principals: Arc<dyn PrincipalStore>,
        locator: Arc<dyn ResourceLocator>,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        default_duration_hours: i64,
    ) -> Self {
        Self {
            requests,
            principals,
            locator,
            clock,
            notifier,
            default_duration_hours,
        }
    }

    #[instrument(skip(self, input), fields(requester_id = %requester_id, owner_email = %input.owner_email))]
    pub async fn create(
        &self,
        requester_id: Uuid,
        input: NewAccessRequest,
    ) -> Result<AccessRequestView, ServiceError> {
        let owner = self
            .principals
            .find_by_email(PrincipalKind::Individual, &input.owner_email)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("No individual is registered with that email".to_string())
            })?;

        if input.resource_name.trim().is_empty() {
            return Err(ServiceError::InvalidInput("Resource name is required".to_string()));
        }

        if input.duration_hours > MAX_DURATION_HOURS {
            return Err(ServiceError::InvalidInput(format!(
                "Duration cannot exceed {} hours",
                MAX_DURATION_HOURS
            )));
        }

        self.locator
            .find_resource(owner.id, &input.resource_name)
            .await?
            .ok_or_else(|| ServiceError::ResourceNotFound("Resource not found".to_string()))?;

        let duration_hours = if input.duration_hours > 0 {
            input.duration_hours
        } else {
            self.default_duration_hours
        };

        let now = self.clock.now();
        let request = AccessRequest::new(
            requester_id,
            owner.email.clone(),
            input.resource_name,
            input.purpose,
            duration_hours,
            now,
        );
        self.requests.insert(&request).await?;

        metrics::counter!("access_requests_created_total").increment(1);
        info!(request_id = %request.id, duration_hours, "Access request created");

        let requester = self.requester(requester_id).await;
        let requester_name = company_name(requester.as_ref());

        self.notifier
            .send(templates::access_requested(
                &owner.email,
                owner.profile.greeting_name(),
                &requester_name,
                &request.resource_name,
                &request.purpose,
                request.duration_hours,
            ))
            .await;

        Ok(AccessRequestView::for_requester(&request, requester_name, now))
    }

    /// Commit `decision` on a pending request. Checks run in order: the request
    /// exists (and belongs to the owner), it is still pending, and the
    /// decision literal is valid.
    #[instrument(skip(self))]
    pub async fn decide(
        &self,
        actor: Actor,
        request_id: Uuid,
        decision: &str,
    ) -> Result<AccessRequestView, ServiceError> {
        let request = self
            .requests
            .find_by_id(request_id)
            .await?
            .filter(|r| match &actor {
                Actor::Owner { email } => &r.owner_email == email,
                Actor::Administrator => true,
            })
            .ok_or_else(|| ServiceError::NotFound("Access request not found".to_string()))?;

        if request.status != RequestStatus::Pending {
            return Err(ServiceError::AlreadyProcessed);
        }

        let decision: Decision = decision.parse().map_err(|_| {
            ServiceError::InvalidInput("Decision must be 'Approved' or 'Declined'".to_string())
        })?;

        let location = match decision {
            Decision::Approved => Some(self.current_location(&request).await?),
            Decision::Declined => None,
        };

        let now = self.clock.now();
        let decided = request.decided(decision, now, location).ok_or_else(|| {
            ServiceError::InvalidInput("Requested duration is out of range".to_string())
        })?;

        if !self.requests.resolve(&decided).await? {
            warn!(request_id = %request_id, "Lost decision race");
            return Err(ServiceError::AlreadyProcessed);
        }

        metrics::counter!("access_requests_decided_total", "decision" => decision.as_str())
            .increment(1);
        info!(request_id = %request_id, decision = decision.as_str(), "Access request decided");

        let requester = self.requester(decided.requester_id).await;

        if let Some(org) = &requester {
            self.notifier
                .send(templates::access_decided(
                    &org.email,
                    org.profile.greeting_name(),
                    &decided.resource_name,
                    decision.as_str(),
                    decided.expires_at,
                ))
                .await;
        }

        Ok(AccessRequestView::for_owner(
            &decided,
            company_name(requester.as_ref()),
            now,
        ))
    }

    /// Requests addressed to `owner_email`, newest first. Empty when none.
    #[instrument(skip(self))]
    pub async fn list_by_owner(
        &self,
        owner_email: &str,
    ) -> Result<Vec<AccessRequestView>, ServiceError> {
        let requests = self.requests.list_by_owner(owner_email).await?;
        let names = self.requester_names(&requests).await?;
        let now = self.clock.now();

        Ok(requests
            .iter()
            .map(|r| AccessRequestView::for_owner(r, name_for(&names, r.requester_id), now))
            .collect())
    }

    /// Requests sent by `requester_id`, newest first. Empty when none.
    #[instrument(skip(self))]
    pub async fn list_by_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<AccessRequestView>, ServiceError> {
        let requests = self.requests.list_by_requester(requester_id).await?;
        let names = self.requester_names(&requests).await?;
        let now = self.clock.now();

        Ok(requests
            .iter()
            .map(|r| AccessRequestView::for_requester(r, name_for(&names, r.requester_id), now))
            .collect())
    }

    /// The location behind an approved request, only while the grant is live.
    #[instrument(skip(self))]
    pub async fn resolve_grant(
        &self,
        requester_id: Uuid,
        request_id: Uuid,
    ) -> Result<Grant, ServiceError> {
        let request = self
            .requests
            .find_by_id(request_id)
            .await?
            .filter(|r| r.requester_id == requester_id)
            .ok_or_else(|| ServiceError::NotFound("Access request not found".to_string()))?;

        if request.status != RequestStatus::Approved {
            return Err(ServiceError::Forbidden(
                "Access has not been granted".to_string(),
            ));
        }

        if !request.is_currently_valid(self.clock.now()) {
            return Err(ServiceError::GrantExpired);
        }

        match (request.resource_location, request.expires_at) {
            (Some(resource_location), Some(expires_at)) => Ok(Grant {
                request_id: request.id,
                resource_name: request.resource_name,
                resource_location,
                expires_at,
            }),
            _ => Err(ServiceError::Unexpected(anyhow::anyhow!(
                "approved request {} has no grant details",
                request.id
            ))),
        }
    }

    async fn current_location(&self, request: &AccessRequest) -> Result<String, ServiceError> {
        let owner = self
            .principals
            .find_by_email(PrincipalKind::Individual, &request.owner_email)
            .await?
            .ok_or_else(|| ServiceError::ResourceNotFound("Resource not found".to_string()))?;

        let resource = self
            .locator
            .find_resource(owner.id, &request.resource_name)
            .await?
            .ok_or_else(|| ServiceError::ResourceNotFound("Resource not found".to_string()))?;

        Ok(resource.location)
    }

    /// Post-commit lookup of the requesting organization. A failure here must
    /// not turn a committed transition into an error, so it only logs.
    async fn requester(&self, requester_id: Uuid) -> Option<Principal> {
        match self
            .principals
            .find_by_id(PrincipalKind::Organization, requester_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(requester_id = %requester_id, error = %e, "Requester lookup failed");
                None
            }
        }
    }

    async fn requester_names(
        &self,
        requests: &[AccessRequest],
    ) -> Result<HashMap<Uuid, String>, ServiceError> {
        let mut names = HashMap::new();
        for request in requests {
            if names.contains_key(&request.requester_id) {
                continue;
            }
            let org = self
                .principals
                .find_by_id(PrincipalKind::Organization, request.requester_id)
                .await?;
            names.insert(request.requester_id, company_name(org.as_ref()));
        }
        Ok(names)
    }
}

fn company_name(principal: Option<&Principal>) -> String {
    match principal.map(|p| &p.profile) {
        Some(Profile::Organization { company_name, .. }) if !company_name.is_empty() => {
            company_name.clone()
        }
        _ => UNKNOWN_REQUESTER.to_string(),
    }
}

fn name_for(names: &HashMap<Uuid, String>, id: Uuid) -> String {
    names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_REQUESTER.to_string())
}

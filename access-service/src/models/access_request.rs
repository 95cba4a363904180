use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest grant a request may ask for: one year.
pub const MAX_DURATION_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Declined => "declined",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "declined" => Ok(RequestStatus::Declined),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

/// The owner's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Declined,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Declined => "declined",
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            Decision::Approved => RequestStatus::Approved,
            Decision::Declined => RequestStatus::Declined,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("approved") {
            Ok(Decision::Approved)
        } else if s.eq_ignore_ascii_case("declined") {
            Ok(Decision::Declined)
        } else {
            Err(format!("Invalid decision: {}", s))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub owner_email: String,
    pub resource_name: String,
    pub purpose: String,
    pub duration_hours: i64,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub resource_location: Option<String>,
}

impl AccessRequest {
    pub fn new(
        requester_id: Uuid,
        owner_email: String,
        resource_name: String,
        purpose: String,
        duration_hours: i64,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            owner_email,
            resource_name,
            purpose,
            duration_hours,
            status: RequestStatus::Pending,
            requested_at,
            expires_at: None,
            resource_location: None,
        }
    }

    /// The record as it looks after `decision` is committed at `now`.
    /// `location` is only consulted for an approval. `None` when the expiry
    /// falls outside the representable range.
    pub fn decided(
        &self,
        decision: Decision,
        now: DateTime<Utc>,
        location: Option<String>,
    ) -> Option<Self> {
        let mut next = self.clone();
        next.status = decision.status();
        if decision == Decision::Approved {
            let expires_at = Duration::try_hours(self.duration_hours)
                .and_then(|duration| now.checked_add_signed(duration))?;
            next.expires_at = Some(expires_at);
            next.resource_location = location;
        }
        Some(next)
    }

    /// Whether the grant can be exercised right now. Status alone records the
    /// decision; an approved grant past `expires_at` is void.
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Approved && self.expires_at.is_some_and(|exp| now <= exp)
    }
}

/// Listing entry returned to either party.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRequestView {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub owner_email: String,
    pub resource_name: String,
    pub purpose: String,
    pub duration_hours: i64,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_location: Option<String>,
    pub grant_active: bool,
}

impl AccessRequestView {
    fn build(request: &AccessRequest, requester_name: String, now: DateTime<Utc>, show_location: bool) -> Self {
        let grant_active = request.is_currently_valid(now);
        Self {
            id: request.id,
            requester_id: request.requester_id,
            requester_name,
            owner_email: request.owner_email.clone(),
            resource_name: request.resource_name.clone(),
            purpose: request.purpose.clone(),
            duration_hours: request.duration_hours,
            status: request.status,
            requested_at: request.requested_at,
            expires_at: request.expires_at,
            resource_location: if show_location {
                request.resource_location.clone()
            } else {
                None
            },
            grant_active,
        }
    }

    /// The requesting organization only sees the location of a live grant.
    pub fn for_requester(request: &AccessRequest, requester_name: String, now: DateTime<Utc>) -> Self {
        let active = request.is_currently_valid(now);
        Self::build(request, requester_name, now, active)
    }

    /// The owner sees whatever location was recorded.
    pub fn for_owner(request: &AccessRequest, requester_name: String, now: DateTime<Utc>) -> Self {
        Self::build(request, requester_name, now, true)
    }
}

use serde::Deserialize;
use validator::Validate;

/// `resource_name` is checked by the ledger so a blank name yields the
/// ledger's own error.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccessRequest {
    #[validate(email(message = "Invalid owner email format"))]
    pub owner_email: String,

    #[serde(default)]
    pub resource_name: String,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Purpose is too long"))]
    pub purpose: String,

    /// Zero or negative falls back to the configured default.
    #[serde(default)]
    #[validate(range(max = 8760, message = "Duration cannot exceed one year"))]
    pub duration_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DecisionRequest {
    pub decision: String,
}

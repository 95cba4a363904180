use serde::{Deserialize, Serialize};

/// A named resource owned by an individual together with where it can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub location: String,
}

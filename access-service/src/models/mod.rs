pub mod access_request;
pub mod principal;
pub mod resource;

pub use access_request::{
    AccessRequest, AccessRequestView, Decision, RequestStatus, MAX_DURATION_HOURS,
};
pub use principal::{Credential, OneTimeCode, Principal, PrincipalKind, Profile, StoredRefreshToken};
pub use resource::ResourceRecord;

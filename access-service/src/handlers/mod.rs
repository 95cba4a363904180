pub mod access_requests;
pub mod credentials;
pub mod health;
pub mod metrics;

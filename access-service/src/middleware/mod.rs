pub mod admin;
pub mod auth;

pub use admin::admin_auth_middleware;
pub use auth::{individual_auth_middleware, organization_auth_middleware, AuthPrincipal};

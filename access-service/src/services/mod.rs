//! Services layer for access-service.
//!
//! Credential lifecycle, the access-request ledger, and the collaborator
//! seams (stores, resource locator, notification sink, identity provider)
//! they run against.

mod credentials;
pub mod database;
pub mod email;
pub mod error;
pub mod identity;
mod jwt;
mod ledger;
pub mod memory;
pub mod metrics;
pub mod store;

pub use credentials::{CredentialService, Registration};
pub use database::{PgAccessRequestStore, PgPrincipalStore, PgResourceLocator};
pub use email::{Notification, NotificationSink, Notifier, RecordingNotifier, SmtpNotifier};
pub use error::ServiceError;
pub use identity::{ExternalIdentity, GoogleTokenVerifier, IdentityVerifier, StaticIdentityVerifier};
pub use jwt::{AccessTokenClaims, JwtService, TokenRejection, TokenResponse};
pub use ledger::{AccessLedger, Actor, Grant, NewAccessRequest};
pub use memory::{InMemoryAccessRequestStore, InMemoryPrincipalStore, InMemoryResourceLocator};
pub use store::{AccessRequestStore, CodeSlot, PrincipalStore, ResourceLocator, StoreError};

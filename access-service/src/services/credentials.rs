//! Credential and verification lifecycle shared by both principal kinds.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::email::{templates, Notifier};
use super::error::ServiceError;
use super::identity::IdentityVerifier;
use super::jwt::{JwtService, TokenResponse};
use super::store::{CodeSlot, PrincipalStore};
use crate::config::CodeConfig;
use crate::models::{Credential, OneTimeCode, Principal, PrincipalKind, Profile, StoredRefreshToken};
use crate::utils::{
    hash_password, verify_against_placeholder, verify_password, Clock, CodeGenerator, Password,
    PasswordHashString,
};

/// Input to `CredentialService::register`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: Password,
    pub confirm_password: Password,
    pub profile: Profile,
}

#[derive(Clone)]
pub struct CredentialService {
    principals: Arc<dyn PrincipalStore>,
    jwt: JwtService,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    identity: Arc<dyn IdentityVerifier>,
    policy: CodeConfig,
}

fn record_login(kind: PrincipalKind, outcome: &'static str) {
    metrics::counter!("login_attempts_total", "kind" => kind.as_str(), "outcome" => outcome)
        .increment(1);
}

impl CredentialService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        jwt: JwtService,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        identity: Arc<dyn IdentityVerifier>,
        policy: CodeConfig,
    ) -> Self {
        Self {
            principals,
            jwt,
            codes,
            clock,
            notifier,
            identity,
            policy,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    #[instrument(skip(self, registration), fields(email = %registration.email, kind = %registration.profile.kind()))]
    pub async fn register(&self, registration: Registration) -> Result<Uuid, ServiceError> {
        let kind = registration.profile.kind();

        if registration.password.as_str() != registration.confirm_password.as_str() {
            return Err(ServiceError::InvalidInput("Passwords do not match".to_string()));
        }

        if self
            .principals
            .find_by_email(kind, &registration.email)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email is already registered".to_string()));
        }

        let hash = hash_password(&registration.password)?;
        let now = self.clock.now();
        let code = self.codes.generate();

        let mut principal = Principal::new(
            registration.email,
            Credential::Password(hash.into_string()),
            registration.profile,
            now,
        );
        principal.verification = Some(OneTimeCode::new(code.clone(), now));

        self.principals.insert(&principal).await?;

        metrics::counter!("principal_registrations_total", "kind" => kind.as_str()).increment(1);
        info!(principal_id = %principal.id, "Principal registered");

        self.notifier
            .send(templates::verification_code(
                &principal.email,
                principal.profile.greeting_name(),
                &code,
                self.policy.verification_window_minutes,
            ))
            .await;

        Ok(principal.id)
    }

    #[instrument(skip(self, code))]
    pub async fn verify_email(
        &self,
        kind: PrincipalKind,
        email: &str,
        code: &str,
    ) -> Result<(), ServiceError> {
        let mut principal = self.find(kind, email).await?;

        if principal.email_verified {
            return Err(ServiceError::AlreadyVerified);
        }

        let issued = match &principal.verification {
            Some(issued) if issued.matches(code) => issued.clone(),
            _ => return Err(ServiceError::InvalidCode),
        };

        principal.verification = None;

        if issued.is_expired(self.clock.now(), self.policy.verification_window_minutes) {
            if self
                .principals
                .consume_code(&principal, CodeSlot::Verification, &issued.code)
                .await?
            {
                info!(principal_id = %principal.id, "Expired verification code cleared");
            }
            return Err(ServiceError::CodeExpired);
        }

        principal.email_verified = true;
        let consumed = self
            .principals
            .consume_code(&principal, CodeSlot::Verification, &issued.code)
            .await?;
        if !consumed {
            warn!(principal_id = %principal.id, "Verification code already used");
            return Err(ServiceError::InvalidCode);
        }

        info!(principal_id = %principal.id, "Email verified");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resend_verification_code(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> Result<(), ServiceError> {
        let mut principal = self.find(kind, email).await?;

        if principal.email_verified {
            return Err(ServiceError::AlreadyVerified);
        }

        let code = self.codes.generate();
        principal.verification = Some(OneTimeCode::new(code.clone(), self.clock.now()));
        self.principals.update(&principal).await?;

        info!(principal_id = %principal.id, "Verification code reissued");

        self.notifier
            .send(templates::verification_code(
                &principal.email,
                principal.profile.greeting_name(),
                &code,
                self.policy.verification_window_minutes,
            ))
            .await;

        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        kind: PrincipalKind,
        email: &str,
        password: &Password,
    ) -> Result<TokenResponse, ServiceError> {
        let Some(principal) = self.principals.find_by_email(kind, email).await? else {
            verify_against_placeholder(password);
            record_login(kind, "invalid_credentials");
            return Err(ServiceError::InvalidCredentials);
        };

        let Some(hash) = principal.credential.password_hash() else {
            verify_against_placeholder(password);
            record_login(kind, "invalid_credentials");
            return Err(ServiceError::InvalidCredentials);
        };

        if !verify_password(password, &PasswordHashString::new(hash.to_string()))? {
            record_login(kind, "invalid_credentials");
            return Err(ServiceError::InvalidCredentials);
        }

        if !principal.email_verified {
            record_login(kind, "email_not_verified");
            return Err(ServiceError::EmailNotVerified);
        }

        let tokens = self.issue_tokens(&principal).await?;

        record_login(kind, "success");
        info!(principal_id = %principal.id, "Login succeeded");
        Ok(tokens)
    }

    /// Always succeeds for the caller; a code is only sent when the account
    /// exists and signs in with a password.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, kind: PrincipalKind, email: &str) -> Result<(), ServiceError> {
        let Some(mut principal) = self.principals.find_by_email(kind, email).await? else {
            info!("Password reset requested for unknown account");
            return Ok(());
        };

        if principal.credential.password_hash().is_none() {
            info!(principal_id = %principal.id, "Password reset requested for external account");
            return Ok(());
        }

        let code = self.codes.generate();
        principal.password_reset = Some(OneTimeCode::new(code.clone(), self.clock.now()));
        self.principals.update(&principal).await?;

        info!(principal_id = %principal.id, "Password reset code issued");

        self.notifier
            .send(templates::password_reset(
                &principal.email,
                principal.profile.greeting_name(),
                &code,
                self.policy.password_reset_window_minutes,
            ))
            .await;

        Ok(())
    }

    #[instrument(skip(self, code, new_password))]
    pub async fn reset_password(
        &self,
        kind: PrincipalKind,
        email: &str,
        code: &str,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let Some(mut principal) = self.principals.find_by_email(kind, email).await? else {
            return Err(ServiceError::InvalidCredentials);
        };

        if principal.credential.password_hash().is_none() {
            return Err(ServiceError::InvalidCredentials);
        }

        let issued = match &principal.password_reset {
            Some(issued) if issued.matches(code) => issued.clone(),
            _ => return Err(ServiceError::InvalidOrExpiredToken),
        };

        principal.password_reset = None;

        if issued.is_expired(self.clock.now(), self.policy.password_reset_window_minutes) {
            if self
                .principals
                .consume_code(&principal, CodeSlot::PasswordReset, &issued.code)
                .await?
            {
                info!(principal_id = %principal.id, "Expired reset code cleared");
            }
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let hash = hash_password(new_password)?;
        principal.credential = Credential::Password(hash.into_string());

        // Sessions end before the new password takes effect.
        self.principals
            .set_refresh_token(kind, principal.id, None)
            .await?;

        let consumed = self
            .principals
            .consume_code(&principal, CodeSlot::PasswordReset, &issued.code)
            .await?;
        if !consumed {
            warn!(principal_id = %principal.id, "Reset code already used");
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        info!(principal_id = %principal.id, "Password reset");
        Ok(())
    }

    /// Exchange a refresh token for a new pair. The presented token stops
    /// working whether or not the caller keeps the response.
    #[instrument(skip(self, presented))]
    pub async fn refresh_token(
        &self,
        kind: PrincipalKind,
        email: &str,
        presented: &str,
    ) -> Result<TokenResponse, ServiceError> {
        let Some(principal) = self.principals.find_by_email(kind, email).await? else {
            return Err(ServiceError::InvalidOrExpiredToken);
        };

        let now = self.clock.now();
        let current = match &principal.refresh_token {
            Some(current) if current.matches(presented) && !current.is_expired(now) => current,
            _ => return Err(ServiceError::InvalidOrExpiredToken),
        };

        let refresh_token = self.jwt.generate_refresh_token();
        let next = StoredRefreshToken::new(&refresh_token, self.jwt.refresh_token_expires_at(now));

        let rotated = self
            .principals
            .rotate_refresh_token(kind, principal.id, &current.hash, &next)
            .await?;
        if !rotated {
            warn!(principal_id = %principal.id, "Refresh token already rotated");
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let access_token = self.jwt.generate_access_token(&principal, now)?;

        info!(principal_id = %principal.id, "Refresh token rotated");
        Ok(self
            .jwt
            .token_response(principal.id, access_token, refresh_token))
    }

    /// Sign an individual in with a token from an external identity provider,
    /// creating the account on first use.
    #[instrument(skip(self, id_token))]
    pub async fn sign_in_external(&self, id_token: &str) -> Result<TokenResponse, ServiceError> {
        let kind = PrincipalKind::Individual;

        let Some(identity) = self.identity.verify(id_token).await? else {
            record_login(kind, "invalid_external_token");
            return Err(ServiceError::InvalidOrExpiredToken);
        };

        let principal = match self.principals.find_by_email(kind, &identity.email).await? {
            Some(mut existing) => {
                if !existing.email_verified {
                    // The provider vouches for the address.
                    existing.email_verified = true;
                    existing.verification = None;
                    self.principals.update(&existing).await?;
                }
                existing
            }
            None => {
                let mut created = Principal::new(
                    identity.email.clone(),
                    Credential::External {
                        provider: identity.provider.clone(),
                    },
                    Profile::Individual {
                        full_name: identity.name.clone(),
                    },
                    self.clock.now(),
                );
                created.email_verified = true;
                self.principals.insert(&created).await?;

                metrics::counter!("principal_registrations_total", "kind" => kind.as_str())
                    .increment(1);
                info!(principal_id = %created.id, provider = %identity.provider, "Principal created from external identity");
                created
            }
        };

        let tokens = self.issue_tokens(&principal).await?;

        record_login(kind, "success");
        Ok(tokens)
    }

    async fn find(&self, kind: PrincipalKind, email: &str) -> Result<Principal, ServiceError> {
        self.principals
            .find_by_email(kind, email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))
    }

    async fn issue_tokens(&self, principal: &Principal) -> Result<TokenResponse, ServiceError> {
        let now = self.clock.now();
        let access_token = self.jwt.generate_access_token(principal, now)?;
        let refresh_token = self.jwt.generate_refresh_token();
        let stored = StoredRefreshToken::new(&refresh_token, self.jwt.refresh_token_expires_at(now));

        self.principals
            .set_refresh_token(principal.kind(), principal.id, Some(&stored))
            .await?;

        Ok(self
            .jwt
            .token_response(principal.id, access_token, refresh_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::email::RecordingNotifier;
    use crate::services::identity::StaticIdentityVerifier;
    use crate::services::memory::InMemoryPrincipalStore;
    use crate::services::store::StoreError;
    use crate::utils::{ManualClock, SeededCodeGenerator};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Delegates to the in-memory store; revoking sessions fails while `broken`.
    #[derive(Default)]
    struct FailingRevocation {
        inner: InMemoryPrincipalStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl PrincipalStore for FailingRevocation {
        async fn find_by_email(
            &self,
            kind: PrincipalKind,
            email: &str,
        ) -> Result<Option<Principal>, StoreError> {
            self.inner.find_by_email(kind, email).await
        }

        async fn find_by_id(
            &self,
            kind: PrincipalKind,
            id: Uuid,
        ) -> Result<Option<Principal>, StoreError> {
            self.inner.find_by_id(kind, id).await
        }

        async fn insert(&self, principal: &Principal) -> Result<(), StoreError> {
            self.inner.insert(principal).await
        }

        async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
            self.inner.update(principal).await
        }

        async fn set_refresh_token(
            &self,
            kind: PrincipalKind,
            id: Uuid,
            token: Option<&StoredRefreshToken>,
        ) -> Result<(), StoreError> {
            if token.is_none() && self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Backend(anyhow::anyhow!("db blip")));
            }
            self.inner.set_refresh_token(kind, id, token).await
        }

        async fn rotate_refresh_token(
            &self,
            kind: PrincipalKind,
            id: Uuid,
            expected_hash: &str,
            next: &StoredRefreshToken,
        ) -> Result<bool, StoreError> {
            self.inner
                .rotate_refresh_token(kind, id, expected_hash, next)
                .await
        }

        async fn consume_code(
            &self,
            principal: &Principal,
            slot: CodeSlot,
            expected: &str,
        ) -> Result<bool, StoreError> {
            self.inner.consume_code(principal, slot, expected).await
        }
    }

    fn service(principals: Arc<FailingRevocation>) -> CredentialService {
        CredentialService::new(
            principals,
            JwtService::new(JwtConfig {
                secret: "unit-test-secret-unit-test-secret".to_string(),
                issuer: "access-service".to_string(),
                audience: "access-service".to_string(),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
            }),
            Arc::new(SeededCodeGenerator::new(7)),
            Arc::new(ManualClock::new(Utc::now())),
            Notifier::new(Arc::new(RecordingNotifier::new()), Duration::from_secs(1)),
            Arc::new(StaticIdentityVerifier::new()),
            CodeConfig {
                verification_window_minutes: 15,
                password_reset_window_minutes: 15,
            },
        )
    }

    #[tokio::test]
    async fn test_failed_revocation_keeps_the_old_password_and_code() {
        let principals = Arc::new(FailingRevocation::default());
        let credentials = service(principals.clone());
        let old = Password::new("original-password".to_string());
        let new = Password::new("replacement-password".to_string());

        let mut alice = Principal::new(
            "alice@x.com".to_string(),
            Credential::Password(hash_password(&old).unwrap().into_string()),
            Profile::Individual {
                full_name: "Alice".to_string(),
            },
            Utc::now(),
        );
        alice.email_verified = true;
        principals.insert(&alice).await.unwrap();

        credentials
            .forgot_password(PrincipalKind::Individual, "alice@x.com")
            .await
            .unwrap();
        let code = principals
            .find_by_id(PrincipalKind::Individual, alice.id)
            .await
            .unwrap()
            .and_then(|p| p.password_reset)
            .expect("reset code issued")
            .code;

        principals.broken.store(true, Ordering::SeqCst);
        let err = credentials
            .reset_password(PrincipalKind::Individual, "alice@x.com", &code, &new)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unexpected");

        credentials
            .login(PrincipalKind::Individual, "alice@x.com", &old)
            .await
            .expect("old password still valid");

        // The code survives so the user can retry.
        principals.broken.store(false, Ordering::SeqCst);
        credentials
            .reset_password(PrincipalKind::Individual, "alice@x.com", &code, &new)
            .await
            .expect("retry succeeds");
        credentials
            .login(PrincipalKind::Individual, "alice@x.com", &new)
            .await
            .expect("new password valid");
    }

    #[tokio::test]
    async fn test_unknown_and_external_logins_fail_alike() {
        let principals = Arc::new(FailingRevocation::default());
        let credentials = service(principals.clone());
        let external = Principal::new(
            "ivy@gmail.com".to_string(),
            Credential::External {
                provider: "google".to_string(),
            },
            Profile::Individual {
                full_name: "Ivy".to_string(),
            },
            Utc::now(),
        );
        principals.insert(&external).await.unwrap();
        let password = Password::new("whatever-password".to_string());

        for email in ["ivy@gmail.com", "nobody@x.com"] {
            let err = credentials
                .login(PrincipalKind::Individual, email, &password)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidCredentials), "{}", email);
        }
    }
}

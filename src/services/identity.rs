//! Identity provider contract, role policy and sessions

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    config::{AccountConfig, AuthConfig},
    error::{AppError, AppResult},
    models::session::{Actor, Capability, Credentials, Identity, SessionClaims},
};

/// Something that can vouch for a subject given its credentials.
///
/// Implementations answer `Unauthorized` for unknown subjects and wrong
/// secrets alike.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> AppResult<Identity>;
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid username or password".to_string())
}

/// Identity provider over the accounts listed in configuration
pub struct ConfigIdentityProvider {
    accounts: HashMap<String, AccountConfig>,
}

impl ConfigIdentityProvider {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|a| (a.username.clone(), a))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityProvider for ConfigIdentityProvider {
    async fn authenticate(&self, credentials: &Credentials) -> AppResult<Identity> {
        let account = self
            .accounts
            .get(&credentials.username)
            .ok_or_else(invalid_credentials)?;

        if !verify_password(&account.password_hash, &credentials.password)? {
            return Err(invalid_credentials());
        }

        Ok(Identity {
            subject_id: account.id,
            username: account.username.clone(),
            role: account.role.clone(),
        })
    }
}

fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Maps role names to the capabilities they grant
#[derive(Debug, Clone)]
pub struct RolePolicy {
    roles: HashMap<String, Vec<Capability>>,
}

impl RolePolicy {
    pub fn new(roles: HashMap<String, Vec<Capability>>) -> Self {
        Self { roles }
    }

    /// Capabilities for `role`; an unknown role grants nothing
    pub fn capabilities_for(&self, role: &str) -> Vec<Capability> {
        let mut capabilities = self.roles.get(role).cloned().unwrap_or_default();
        capabilities.sort();
        capabilities.dedup();
        capabilities
    }
}

/// Answer to a successful login
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionEstablished {
    pub access_token: String,
    pub token_type: String,
    pub role: String,
    pub capabilities: Vec<Capability>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct SessionService {
    provider: Arc<dyn IdentityProvider>,
    policy: RolePolicy,
    config: AuthConfig,
}

impl SessionService {
    pub fn new(provider: Arc<dyn IdentityProvider>, policy: RolePolicy, config: AuthConfig) -> Self {
        Self {
            provider,
            policy,
            config,
        }
    }

    /// Authenticate and issue a token carrying the role and its capabilities
    pub async fn login(&self, credentials: &Credentials) -> AppResult<SessionEstablished> {
        let identity = self.provider.authenticate(credentials).await.map_err(|e| {
            tracing::info!("Login rejected for '{}'", credentials.username);
            e
        })?;

        let capabilities = self.policy.capabilities_for(&identity.role);
        if capabilities.is_empty() {
            tracing::warn!(
                "Subject {} has role '{}' which grants no capabilities",
                identity.subject_id,
                identity.role
            );
        }

        let now = Utc::now().timestamp();
        let exp = now + (self.config.jwt_expiration_hours as i64 * 3600);

        let claims = SessionClaims {
            sub: identity.username,
            subject_id: identity.subject_id,
            role: identity.role.clone(),
            capabilities: capabilities.clone(),
            exp,
            iat: now,
        };

        let access_token = claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;

        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AppError::Internal(format!("Invalid expiry timestamp {}", exp)))?;

        tracing::info!("Session opened for subject {}", identity.subject_id);
        Ok(SessionEstablished {
            access_token,
            token_type: "Bearer".to_string(),
            role: identity.role,
            capabilities,
            expires_at,
        })
    }

    /// Resolve a bearer token to the acting subject
    pub fn verify(&self, token: &str) -> AppResult<Actor> {
        SessionClaims::from_token(token, &self.config.jwt_secret)
            .map(Actor::from)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))
    }
}

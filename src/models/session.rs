//! Session claims, roles and capabilities

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// A permission granted by a role. Authorization checks test for these,
/// never for role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Take units of an item on loan
    Borrow,
    /// Close reservations held by someone else
    ReturnAny,
    /// Force-cancel reservations
    CancelAny,
    /// Create, edit and retire equipment
    ManageEquipment,
    /// Inspect the reservation ledger
    ViewLedger,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Borrow => "borrow",
            Capability::ReturnAny => "return_any",
            Capability::CancelAny => "cancel_any",
            Capability::ManageEquipment => "manage_equipment",
            Capability::ViewLedger => "view_ledger",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials submitted to the identity provider
#[derive(Clone, Deserialize, ToSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Subject vouched for by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: i32,
    pub username: String,
    pub role: String,
}

/// The caller of an engine operation, passed explicitly into every check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Actor {
    pub subject_id: i32,
    pub username: String,
    pub role: String,
    pub capabilities: Vec<Capability>,
}

impl Actor {
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Role '{}' lacks the '{}' capability",
                self.role, capability
            )))
        }
    }
}

/// JWT Claims for authenticated sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub subject_id: i32,
    pub role: String,
    pub capabilities: Vec<Capability>,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }
}

impl From<SessionClaims> for Actor {
    fn from(claims: SessionClaims) -> Self {
        Actor {
            subject_id: claims.subject_id,
            username: claims.sub,
            role: claims.role,
            capabilities: claims.capabilities,
        }
    }
}

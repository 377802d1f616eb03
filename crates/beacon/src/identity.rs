//! Principals, roles, and the bearer-token surface.
//!
//! Token issuance is deliberately thin: the core consumes an
//! already-validated principal, and every lifecycle decision goes through the
//! policy chokepoint rather than ad-hoc role checks in handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::domain::StaffId;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Responder,
    Viewer,
    /// Trusted machine caller (mobile gateway, webhook bridge).
    Service,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Responder => "responder",
            Role::Viewer => "viewer",
            Role::Service => "service",
        }
    }
}

/// An authenticated caller. Responders carry the staff record they act as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
    pub staff_id: Option<StaffId>,
}

impl Principal {
    pub fn system() -> Self {
        Self {
            username: "system".to_string(),
            role: Role::Admin,
            staff_id: None,
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

struct UserRecord {
    password_digest: String,
    role: Role,
    staff_id: Option<StaffId>,
}

/// In-process account registry. The admin account is bootstrapped from
/// configuration; responder accounts are provisioned alongside staff records.
#[derive(Default)]
pub struct UserDirectory {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl UserDirectory {
    pub fn register(
        &self,
        username: impl Into<String>,
        password: &str,
        role: Role,
        staff_id: Option<StaffId>,
    ) {
        let mut users = self.users.lock().expect("user directory mutex poisoned");
        users.insert(
            username.into(),
            UserRecord {
                password_digest: sha256_hex(password.as_bytes()),
                role,
                staff_id,
            },
        );
    }

    pub fn verify(&self, username: &str, password: &str) -> Option<Principal> {
        let users = self.users.lock().expect("user directory mutex poisoned");
        let record = users.get(username)?;
        let candidate = sha256_hex(password.as_bytes());
        if constant_time_eq(&candidate, &record.password_digest) {
            Some(Principal {
                username: username.to_string(),
                role: record.role,
                staff_id: record.staff_id.clone(),
            })
        } else {
            None
        }
    }
}

/// Issued bearer tokens mapped back to their principal.
#[derive(Default)]
pub struct AuthTokens {
    tokens: Mutex<HashMap<String, Principal>>,
}

impl AuthTokens {
    pub fn issue(&self, principal: Principal) -> String {
        let token = format!("tok-{}", Uuid::new_v4().simple());
        self.tokens
            .lock()
            .expect("token table mutex poisoned")
            .insert(token.clone(), principal);
        token
    }

    pub fn resolve(&self, token: &str) -> Option<Principal> {
        self.tokens
            .lock()
            .expect("token table mutex poisoned")
            .get(token)
            .cloned()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tokens = parts
            .extensions
            .get::<Arc<AuthTokens>>()
            .ok_or_else(|| CoreError::Internal("auth token table not installed".to_string()))?;

        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CoreError::Unauthorized("bearer token required".to_string()))?;

        tokens
            .resolve(bearer)
            .ok_or_else(|| CoreError::Unauthorized("unknown or expired token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_registered_credentials() {
        let directory = UserDirectory::default();
        directory.register("ops", "hunter2", Role::Admin, None);

        let principal = directory.verify("ops", "hunter2").expect("valid login");
        assert_eq!(principal.role, Role::Admin);
        assert!(directory.verify("ops", "hunter3").is_none());
        assert!(directory.verify("ghost", "hunter2").is_none());
    }

    #[test]
    fn tokens_resolve_to_their_principal() {
        let tokens = AuthTokens::default();
        let token = tokens.issue(Principal {
            username: "field-7".to_string(),
            role: Role::Responder,
            staff_id: Some(StaffId::from("stf-000007")),
        });

        let principal = tokens.resolve(&token).expect("token resolves");
        assert_eq!(principal.username, "field-7");
        assert!(tokens.resolve("tok-bogus").is_none());
    }

    #[test]
    fn digests_are_hex_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

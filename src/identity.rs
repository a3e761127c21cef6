//! Per-request identity claim.
//!
//! The upstream identity provider authenticates the caller and forwards the
//! claim in headers; this process trusts it as-is.

use axum::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::models::Course;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Learner,
    Admin,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

impl Identity {
    pub fn learner(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: None,
            role: Role::Learner,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: None,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owner of the course, or holder of the elevated role.
    pub fn can_manage(&self, course: &Course) -> bool {
        self.is_admin() || course.owner_id == self.user_id
    }

    pub fn require_manage(&self, course: &Course) -> Result<(), CatalogError> {
        if self.can_manage(course) {
            Ok(())
        } else {
            Err(CatalogError::Forbidden(
                "only the course owner or an admin may change this course".into(),
            ))
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CatalogError> {
        let user_id = header_str(headers, USER_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| CatalogError::Forbidden("identity required".into()))?;
        let role = match header_str(headers, USER_ROLE_HEADER) {
            Some(r) if r.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Learner,
        };
        let email = header_str(headers, USER_EMAIL_HEADER)
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        Ok(Self {
            user_id,
            email,
            role,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = CatalogError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_headers(&parts.headers)
    }
}

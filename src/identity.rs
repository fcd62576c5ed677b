use std::collections::HashMap;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header set by the authenticating gateway in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
const ANONYMOUS_NAME: &str = "Explorer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// `users.json` as written by the account service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersFile {
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// Read-only id → display name lookup.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: HashMap<String, String>,
}

impl UserDirectory {
    pub fn from_file(file: UsersFile) -> Self {
        let names = file
            .users
            .into_iter()
            .filter(|u| !u.id.is_empty())
            .map(|u| (u.id, u.name))
            .collect();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn display_name(&self, user_id: &str) -> String {
        self.names
            .get(user_id)
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(ANONYMOUS_NAME)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| CurrentUser(id.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))
    }
}

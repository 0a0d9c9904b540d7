//! User identity for the snapshot
//!
//! Each user field is read from the authenticated principal's claims first
//! and falls back to a request header on its own.

use axum::http::HeaderMap;
use std::collections::HashMap;

use crate::models::UserSnapshot;

/// Authenticated caller, as established by the host's auth layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    pub name: Option<String>,
    pub claims: HashMap<String, String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            claims: HashMap::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// First non-empty claim among `keys`, compared case-insensitively
    pub fn claim(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.claims
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_empty())
                .map(|(_, v)| v.as_str())
        })
    }
}

struct UserField {
    claims: &'static [&'static str],
    header: &'static str,
}

const USER_ID: UserField = UserField {
    claims: &["sub", "user_id", "nameidentifier"],
    header: "x-user-id",
};
const USER_NAME: UserField = UserField {
    claims: &["name", "preferred_username"],
    header: "x-user-name",
};
const EMAIL: UserField = UserField {
    claims: &["email"],
    header: "x-user-email",
};
const CLIENT_ID: UserField = UserField {
    claims: &["client_id", "azp"],
    header: "x-client-id",
};
const ACCOUNT_ID: UserField = UserField {
    claims: &["account_id"],
    header: "x-account-id",
};
const ACCOUNT_CODE: UserField = UserField {
    claims: &["account_code"],
    header: "x-account-code",
};

fn resolve(field: &UserField, principal: Option<&Principal>, headers: &HeaderMap) -> Option<String> {
    principal
        .and_then(|p| p.claim(field.claims))
        .or_else(|| {
            headers
                .get(field.header)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.trim().is_empty())
        })
        .map(str::to_string)
}

pub fn resolve_user(principal: Option<&Principal>, headers: &HeaderMap) -> UserSnapshot {
    UserSnapshot {
        is_authenticated: principal.is_some(),
        user_id: resolve(&USER_ID, principal, headers),
        user_name: resolve(&USER_NAME, principal, headers)
            .or_else(|| principal.and_then(|p| p.name.clone())),
        email: resolve(&EMAIL, principal, headers),
        client_id: resolve(&CLIENT_ID, principal, headers),
        account_id: resolve(&ACCOUNT_ID, principal, headers),
        account_code: resolve(&ACCOUNT_CODE, principal, headers),
        claims: principal.map(|p| p.claims.clone()).unwrap_or_default(),
    }
}

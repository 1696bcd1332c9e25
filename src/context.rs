use std::collections::{HashMap, HashSet};

use axum::http::HeaderMap;

/// Prefix of the headers through which the authenticating proxy passes user attributes.
pub const USER_INFO_HEADER_PREFIX: &str = "x-user-info-";
/// Comma-separated list of roles the authenticated user holds.
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Per-request view of the authenticated user.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub subscribe_id: String,
    pub user_info: HashMap<String, String>,
    pub roles: HashSet<String>,
}

impl RequestContext {
    /// Builds the context from proxy headers. Returns `None` when the
    /// attribute named by `user_token` is missing or empty.
    pub fn from_headers(headers: &HeaderMap, user_token: &str) -> Option<Self> {
        let mut user_info = HashMap::new();
        for (name, value) in headers {
            let Some(attribute) = name.as_str().strip_prefix(USER_INFO_HEADER_PREFIX) else {
                continue;
            };
            if let Ok(value) = value.to_str() {
                user_info.insert(attribute.to_string(), value.trim().to_string());
            }
        }

        let roles = headers
            .get_all(USER_ROLES_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        let subscribe_id = user_info
            .get(user_token)
            .filter(|id| !id.is_empty())?
            .clone();

        Some(Self {
            subscribe_id,
            user_info,
            roles,
        })
    }

    pub fn is_user_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.user_info.get(name).map(String::as_str)
    }
}

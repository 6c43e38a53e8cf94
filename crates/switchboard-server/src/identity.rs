//! Resolving the authenticated user of an upgrade request.
//!
//! Authentication itself happens upstream (a gateway or auth proxy); by the
//! time a request reaches `/ws` it carries the user identity either in the
//! `x-user-id` header or in the `user` query parameter. The header wins.

use axum::http::HeaderMap;
use std::collections::HashMap;
use switchboard_core::UserId;

/// Header carrying the user identity.
pub const USER_HEADER: &str = "x-user-id";

/// Query parameter carrying the user identity.
pub const USER_PARAM: &str = "user";

/// Extract the user identity from a request, if present.
#[must_use]
pub fn resolve_user(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<UserId> {
    let from_header = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let from_query = || {
        query
            .get(USER_PARAM)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
    };

    from_header.or_else(from_query).map(UserId::from)
}

// Request authentication and authorization middleware
//
// Two layers guard the protected API surface: the first turns a bearer
// token into an AuthContext on the request (rejecting disabled subjects),
// the second maps the route to a (resource, action) pair and asks the auth
// manager for a decision.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use lodestar_auth::authn::{extract_bearer, AuthContext};
use lodestar_core::Error;

fn bearer_from_request(request: &Request) -> Option<String> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    };
    extract_bearer(header("authorization"), header("token"))
}

/// Authentication layer: attach `{claims, token}` to the request or fail
/// with 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_from_request(&request)
        .ok_or_else(|| Error::Unauthenticated("missing bearer token".to_string()))?;
    let claims = state.auth.validate_token(&token)?;

    let subject = state
        .auth
        .auth_store()
        .get_subject(&claims.sub)
        .await?
        .ok_or_else(|| Error::Unauthenticated(format!("subject {} not found", claims.sub)))?;
    if subject.disabled {
        return Err(Error::Unauthenticated(format!("subject {} is disabled", claims.sub)).into());
    }

    request
        .extensions_mut()
        .insert(AuthContext { claims, token });
    Ok(next.run(request).await)
}

/// Map an API route to its permission pair: `/api/<section>/...` becomes
/// resource `lodestar.<section>`, action = lowercased HTTP method.
pub fn route_permission(method: &str, path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("/api/")?;
    let section = rest.split('/').next()?;
    if section.is_empty() {
        return None;
    }
    Some((format!("lodestar.{section}"), method.to_lowercase()))
}

/// Authorization layer: enforce the route policy against the token's
/// permission snapshot.
pub async fn authorize(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| Error::Unauthenticated("request not authenticated".to_string()))?;

    if let Some((resource, action)) =
        route_permission(request.method().as_str(), request.uri().path())
    {
        state
            .auth
            .check_permission(&context.token, &resource, &action)
            .await?;
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_permission_mapping() {
        assert_eq!(
            route_permission("GET", "/api/config/db"),
            Some(("lodestar.config".to_string(), "get".to_string()))
        );
        assert_eq!(
            route_permission("DELETE", "/api/auth/users/u1"),
            Some(("lodestar.auth".to_string(), "delete".to_string()))
        );
        assert_eq!(route_permission("GET", "/healthz"), None);
        assert_eq!(route_permission("GET", "/api/"), None);
    }
}

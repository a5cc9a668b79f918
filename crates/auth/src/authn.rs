//! Transport-agnostic request authentication helpers.
//!
//! The HTTP and gRPC shells differ only in how they read headers and name
//! methods; the extraction and policy-mapping rules live here so both
//! middlewares share one implementation.

use crate::jwt::Claims;

/// Authenticated request context attached by the middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

/// Pull the bearer token out of `authorization`/`token` header values.
///
/// A leading `Bearer ` is stripped case-insensitively; a bare token is
/// accepted as-is.
pub fn extract_bearer(authorization: Option<&str>, token_header: Option<&str>) -> Option<String> {
    let raw = authorization.or(token_header)?.trim();
    if raw.is_empty() {
        return None;
    }
    let token = match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => raw[7..].trim(),
        _ => raw,
    };
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Map a fully-qualified method name `/pkg.svc/Method` to its
/// `(resource, action)` pair: resource `pkg.svc`, action lowercased method.
///
/// Returns `None` for names that do not follow the shape.
pub fn method_permission(full_method: &str) -> Option<(String, String)> {
    let rest = full_method.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service.to_string(), method.to_lowercase()))
}

/// Methods that never require authentication: the client-auth entry point
/// itself, reflection, and health checking.
pub const AUTH_SKIP_METHODS: &[&str] = &[
    "/lodestar.auth/ClientAuth",
    "/lodestar.auth/Login",
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
];

/// True when `full_method` is on the skip-list.
pub fn is_auth_exempt(full_method: &str) -> bool {
    AUTH_SKIP_METHODS.contains(&full_method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_variants() {
        assert_eq!(
            extract_bearer(Some("Bearer abc.def"), None).as_deref(),
            Some("abc.def")
        );
        assert_eq!(
            extract_bearer(Some("bearer abc"), None).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_bearer(Some("BEARER abc"), None).as_deref(),
            Some("abc")
        );
        // Bare token without scheme.
        assert_eq!(extract_bearer(Some("abc"), None).as_deref(), Some("abc"));
        // Fallback `token` header.
        assert_eq!(extract_bearer(None, Some("xyz")).as_deref(), Some("xyz"));
        // Authorization wins over token.
        assert_eq!(
            extract_bearer(Some("Bearer a"), Some("b")).as_deref(),
            Some("a")
        );
        assert_eq!(extract_bearer(None, None), None);
        assert_eq!(extract_bearer(Some(""), None), None);
        assert_eq!(extract_bearer(Some("Bearer "), None), None);
    }

    #[test]
    fn test_method_permission_mapping() {
        assert_eq!(
            method_permission("/lodestar.config/SetConfig"),
            Some(("lodestar.config".to_string(), "setconfig".to_string()))
        );
        assert_eq!(
            method_permission("/pkg.svc/Method"),
            Some(("pkg.svc".to_string(), "method".to_string()))
        );
        assert_eq!(method_permission("no-slash"), None);
        assert_eq!(method_permission("/missing-method/"), None);
        assert_eq!(method_permission("//Method"), None);
        assert_eq!(method_permission("/a/b/c"), None);
    }

    #[test]
    fn test_skip_list() {
        assert!(is_auth_exempt("/grpc.health.v1.Health/Check"));
        assert!(is_auth_exempt("/lodestar.auth/ClientAuth"));
        assert!(!is_auth_exempt("/lodestar.config/SetConfig"));
    }
}

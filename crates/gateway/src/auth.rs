use secrecy::{ExposeSecret, SecretString};

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl AuthResult {
    fn allowed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn denied(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
        .filter(|t| !t.is_empty())
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Check an invocation request against the configured gateway token.
///
/// Without a configured token every request is allowed.
pub fn authorize_invocation(expected: Option<&SecretString>, provided: Option<&str>) -> AuthResult {
    let Some(expected) = expected else {
        return AuthResult::allowed();
    };
    let Some(given) = provided else {
        return AuthResult::denied("token_missing");
    };
    if !safe_equal(given, expected.expose_secret()) {
        return AuthResult::denied("token_mismatch");
    }
    AuthResult::allowed()
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    #[test]
    fn test_safe_equal() {
        assert!(safe_equal("abc", "abc"));
        assert!(!safe_equal("abc", "abd"));
        assert!(!safe_equal("abc", "ab"));
        assert!(safe_equal("", ""));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer s3cret")), Some("s3cret"));
        assert_eq!(bearer_token(Some("bearer  s3cret ")), Some("s3cret"));
        assert_eq!(bearer_token(Some("Basic dXNlcjpwdw==")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_no_token_configured_allows_all() {
        assert!(authorize_invocation(None, None).ok);
    }

    #[test]
    fn test_token_checks() {
        let expected: SecretString = Secret::new("s3cret".into());
        assert_eq!(
            authorize_invocation(Some(&expected), None).reason,
            Some("token_missing")
        );
        assert_eq!(
            authorize_invocation(Some(&expected), Some("nope")).reason,
            Some("token_mismatch")
        );
        assert!(authorize_invocation(Some(&expected), Some("s3cret")).ok);
    }
}

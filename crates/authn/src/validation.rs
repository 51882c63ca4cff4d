//! JWT algorithm and key-id validation.
//!
//! This module provides security checks for JWT headers, ensuring only
//! approved asymmetric algorithms are accepted before any key lookup.
//!
//! # Security
//!
//! - Strict algorithm checks to prevent algorithm substitution attacks
//! - Only asymmetric algorithms (RSA, RSA-PSS, ECDSA, EdDSA) are allowed
//! - Symmetric algorithms and "none" are always rejected

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms. A JWKS only publishes
///   public material, so an HMAC token verified against it would be keyed by a
///   value every caller can read.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms.
///
/// Identity providers in front of the processor (Keycloak, SPIRE OIDC) sign
/// with RS256 by default; the remaining asymmetric families are accepted so
/// that realm key rotations to ECDSA or EdDSA keep working.
pub const ACCEPTED_ALGORITHMS: &[&str] =
    &["RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA"];

/// Maximum accepted length of a `kid` header value.
pub const MAX_KID_LENGTH: usize = 256;

/// Validate JWT algorithm against security policies.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is symmetric (HS256, HS384, HS512)
/// - Algorithm is "none"
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use authbridge_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("RS256").is_ok());
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list",
            alg
        )));
    }

    Ok(())
}

/// Validate the `kid` header before it is used as a cache lookup key.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the kid is empty, longer than
/// [`MAX_KID_LENGTH`], or contains control characters.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::invalid_token_format("JWT header 'kid' is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::invalid_token_format(format!(
            "JWT header 'kid' exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if kid.chars().any(char::is_control) {
        return Err(AuthError::invalid_token_format(
            "JWT header 'kid' contains control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("RS256")]
    #[case("RS512")]
    #[case("PS256")]
    #[case("ES256")]
    #[case("EdDSA")]
    fn test_validate_algorithm_asymmetric_accepted(#[case] alg: &str) {
        assert!(validate_algorithm(alg).is_ok());
    }

    #[test]
    fn test_validate_algorithm_symmetric_rejected() {
        assert!(validate_algorithm("HS256").is_err());
        assert!(validate_algorithm("HS384").is_err());
        assert!(validate_algorithm("HS512").is_err());
    }

    #[test]
    fn test_validate_algorithm_none_rejected() {
        let result = validate_algorithm("none");
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons"))
        );
    }

    #[test]
    fn test_validate_algorithm_not_in_list() {
        let result = validate_algorithm("ES512");
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list"))
        );
    }

    #[test]
    fn test_forbidden_and_accepted_are_disjoint() {
        for alg in FORBIDDEN_ALGORITHMS {
            assert!(!ACCEPTED_ALGORITHMS.contains(alg), "{alg} is both forbidden and accepted");
        }
    }

    #[test]
    fn test_validate_kid() {
        assert!(validate_kid("rsa-2024-01").is_ok());
        assert!(validate_kid("").is_err());
        assert!(validate_kid(&"k".repeat(MAX_KID_LENGTH + 1)).is_err());
        assert!(validate_kid("bad\nkid").is_err());
    }
}

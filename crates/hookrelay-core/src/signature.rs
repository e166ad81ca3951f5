//! Multi-provider webhook signature validation.
//!
//! The relay is provider-agnostic: it recognizes the signature headers of
//! GitHub, GitLab, Bitbucket and Gitea and checks the request against a
//! list of shared secrets. Validation succeeds when ANY configured secret
//! matches under ANY supported scheme.
//!
//! | Header | Scheme |
//! |---|---|
//! | `X-Gitlab-Token` | constant-time equality against each secret |
//! | `X-Hub-Signature-256` | `sha256=<hex>` of HMAC-SHA256(secret, body) |
//! | `X-Hub-Signature` | `<hex>` of HMAC-SHA256(secret, body) |
//! | `X-Gitea-Signature` | `sha256=<hex>` of HMAC-SHA256(secret, body) |
//!
//! All comparisons are constant-time via [`subtle::ConstantTimeEq`]; the
//! hex comparison runs over the expected and received strings of equal
//! length. Secrets are never logged.

use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// GitHub HMAC-SHA256 signature header.
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Legacy HMAC signature header (Bitbucket Cloud/Server, older GitHub).
pub const LEGACY_SIGNATURE_HEADER: &str = "x-hub-signature";

/// GitLab shared-token header.
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Gitea/Forgejo HMAC-SHA256 signature header.
pub const GITEA_SIGNATURE_HEADER: &str = "x-gitea-signature";

/// Validates webhook signatures against a list of shared secrets.
#[derive(Debug, Clone, Default)]
pub struct SignatureValidator {
    secrets: Vec<String>,
}

impl SignatureValidator {
    /// Creates a validator over the configured secrets.
    ///
    /// An empty list disables validation entirely.
    #[must_use]
    pub fn new(secrets: Vec<String>) -> Self {
        Self { secrets }
    }

    /// Returns whether any secrets are configured.
    #[must_use]
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Validates a request's signature headers against the body.
    ///
    /// With no secrets configured this always passes. With secrets
    /// configured, the first recognized header decides the scheme; a
    /// request carrying none of the recognized headers fails.
    #[must_use]
    pub fn validate(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.secrets.is_empty() {
            return true;
        }

        if let Some(token) = header_str(headers, GITLAB_TOKEN_HEADER) {
            return self
                .secrets
                .iter()
                .any(|secret| constant_time_eq(token.as_bytes(), secret.as_bytes()));
        }

        if let Some(signature) = header_str(headers, GITHUB_SIGNATURE_HEADER) {
            return self
                .secrets
                .iter()
                .any(|secret| verify_prefixed_hmac(secret, body, signature));
        }

        if let Some(signature) = header_str(headers, LEGACY_SIGNATURE_HEADER) {
            return self
                .secrets
                .iter()
                .any(|secret| verify_hmac_hex(secret, body, signature));
        }

        if let Some(signature) = header_str(headers, GITEA_SIGNATURE_HEADER) {
            return self
                .secrets
                .iter()
                .any(|secret| verify_prefixed_hmac(secret, body, signature));
        }

        false
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Verifies a `sha256=<hex>` signature.
fn verify_prefixed_hmac(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    verify_hmac_hex(secret, body, hex_digest)
}

/// Verifies a bare hex HMAC-SHA256 digest in constant time.
fn verify_hmac_hex(secret: &str, body: &[u8], hex_digest: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), hex_digest.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to compute a valid signature.
    fn compute_signature(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            http::HeaderName::try_from(name).unwrap(),
            value.parse().unwrap(),
        );
        map
    }

    #[test]
    fn test_no_secrets_always_passes() {
        let validator = SignatureValidator::new(vec![]);
        assert!(validator.validate(&HeaderMap::new(), b"anything"));
        assert!(validator.validate(&headers(GITHUB_SIGNATURE_HEADER, "sha256=bogus"), b"x"));
    }

    #[test]
    fn test_secrets_without_known_header_fails() {
        let validator = SignatureValidator::new(vec!["secret".into()]);
        assert!(!validator.validate(&HeaderMap::new(), b"payload"));
        assert!(!validator.validate(&headers("x-unknown-signature", "zzz"), b"payload"));
    }

    #[test]
    fn test_github_signature() {
        let validator = SignatureValidator::new(vec!["secret".into()]);
        let body = br#"{"hello":"world"}"#;

        let good = compute_signature("secret", body);
        assert!(validator.validate(&headers(GITHUB_SIGNATURE_HEADER, &good), body));

        let tampered = compute_signature("secret", b"tampered");
        assert!(!validator.validate(&headers(GITHUB_SIGNATURE_HEADER, &tampered), body));

        let wrong_secret = compute_signature("other", body);
        assert!(!validator.validate(&headers(GITHUB_SIGNATURE_HEADER, &wrong_secret), body));

        // Missing the sha256= prefix.
        let bare = good.trim_start_matches("sha256=").to_string();
        assert!(!validator.validate(&headers(GITHUB_SIGNATURE_HEADER, &bare), body));
    }

    #[test]
    fn test_legacy_signature_is_bare_hex() {
        let validator = SignatureValidator::new(vec!["secret".into()]);
        let body = b"payload";

        let bare = compute_signature("secret", body)
            .trim_start_matches("sha256=")
            .to_string();
        assert!(validator.validate(&headers(LEGACY_SIGNATURE_HEADER, &bare), body));

        // A prefixed value is not valid on the legacy header.
        let prefixed = compute_signature("secret", body);
        assert!(!validator.validate(&headers(LEGACY_SIGNATURE_HEADER, &prefixed), body));
    }

    #[test]
    fn test_gitea_signature() {
        let validator = SignatureValidator::new(vec!["secret".into()]);
        let body = b"gitea payload";

        let good = compute_signature("secret", body);
        assert!(validator.validate(&headers(GITEA_SIGNATURE_HEADER, &good), body));
        assert!(!validator.validate(&headers(GITEA_SIGNATURE_HEADER, "sha256=00"), body));
    }

    #[test]
    fn test_gitlab_token_equality() {
        let validator = SignatureValidator::new(vec!["tok-a".into(), "tok-b".into()]);

        assert!(validator.validate(&headers(GITLAB_TOKEN_HEADER, "tok-a"), b""));
        assert!(validator.validate(&headers(GITLAB_TOKEN_HEADER, "tok-b"), b""));
        assert!(!validator.validate(&headers(GITLAB_TOKEN_HEADER, "tok-c"), b""));
        assert!(!validator.validate(&headers(GITLAB_TOKEN_HEADER, "tok-"), b""));
    }

    #[test]
    fn test_any_secret_matches() {
        let validator =
            SignatureValidator::new(vec!["rotated-out".into(), "current".into()]);
        let body = b"payload";

        let signed_with_second = compute_signature("current", body);
        assert!(validator.validate(&headers(GITHUB_SIGNATURE_HEADER, &signed_with_second), body));
    }

    #[test]
    fn test_constant_time_eq_requires_equal_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(constant_time_eq(b"", b""));
    }
}

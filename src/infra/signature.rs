use {
    crate::domain::error::PipelineError,
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of the raw body.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `header` (hex digest, optionally `sha256=`-prefixed) against the body.
/// The digest comparison is constant time.
pub fn verify(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), PipelineError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PipelineError::WebhookSignature("missing X-Signature header".into()))?;
    let digest = header.strip_prefix("sha256=").unwrap_or(header);
    let expected = hex::decode(digest)
        .map_err(|_| PipelineError::WebhookSignature("signature is not hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PipelineError::WebhookSignature(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PipelineError::WebhookSignature("signature mismatch".into()))
}

/// Equality of two shared secrets (admin bearer tokens) in constant time.
/// Both sides are MACed under `expected` first, so neither the contents nor
/// the length of `presented` shows up in the timing.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let digest = |value: &str| {
        HmacSha256::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };
    match (digest(expected), digest(presented)) {
        (Ok(reference), Ok(candidate)) => candidate
            .verify_slice(&reference.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"event":"pix.paid"}"#;

    #[test]
    fn accepts_own_signature() {
        let sig = sign("whsec_test", BODY);
        assert!(verify("whsec_test", BODY, Some(&sig)).is_ok());
    }

    #[test]
    fn accepts_prefixed_signature() {
        let sig = format!("sha256={}", sign("whsec_test", BODY));
        assert!(verify("whsec_test", BODY, Some(&sig)).is_ok());
    }

    #[test]
    fn rejects_other_secret() {
        let sig = sign("whsec_other", BODY);
        let err = verify("whsec_test", BODY, Some(&sig)).unwrap_err();
        assert!(matches!(err, PipelineError::WebhookSignature(_)));
    }

    #[test]
    fn rejects_tampered_body() {
        let sig = sign("whsec_test", BODY);
        let err = verify("whsec_test", br#"{"event":"pix.paid "}"#, Some(&sig)).unwrap_err();
        assert!(matches!(err, PipelineError::WebhookSignature(_)));
    }

    #[test]
    fn rejects_missing_and_garbage_headers() {
        assert!(verify("whsec_test", BODY, None).is_err());
        assert!(verify("whsec_test", BODY, Some("  ")).is_err());
        assert!(verify("whsec_test", BODY, Some("not-hex")).is_err());
    }

    #[test]
    fn signature_is_64_hex_chars() {
        let sig = sign("whsec_test", BODY);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_match_only_identical_tokens() {
        assert!(tokens_match("admin-secret", "admin-secret"));
        assert!(!tokens_match("admin-secret", "admin-secreT"));
        assert!(!tokens_match("admin-secret", "admin-secret-and-more"));
        assert!(!tokens_match("admin-secret", "admin"));
        assert!(!tokens_match("admin-secret", ""));
    }
}

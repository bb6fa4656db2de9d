use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters of a provider's webhook subscription check.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Returns the challenge to echo when the query is a subscribe request
/// carrying the expected token. No configured token means no handshake.
pub fn verify_handshake(query: &HandshakeQuery, expected: Option<&SecretString>) -> Option<String> {
    let expected = expected.map(|secret| secret.expose_secret()).filter(|token| !token.is_empty())?;
    let challenge = query.challenge.as_deref().filter(|challenge| !challenge.is_empty())?;
    if query.mode.as_deref() != Some("subscribe") {
        return None;
    }
    let presented = query.verify_token.as_deref()?;
    tokens_match(presented, expected).then(|| challenge.to_owned())
}

/// Checks a `sha256=<hex>` body signature. Without a configured secret every
/// body is accepted.
pub fn verify_signature(secret: Option<&SecretString>, header: Option<&str>, body: &[u8]) -> bool {
    let Some(secret) = secret.map(|secret| secret.expose_secret()).filter(|secret| !secret.is_empty())
    else {
        return true;
    };
    let signature = header.unwrap_or_default().trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>` signature of `body`, as the provider would send it.
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a shared-secret header. Without a configured secret every request
/// is accepted.
pub fn verify_secret_token(expected: Option<&SecretString>, header: Option<&str>) -> bool {
    match expected.map(|secret| secret.expose_secret()).filter(|secret| !secret.is_empty()) {
        Some(expected) => header.is_some_and(|presented| tokens_match(presented, expected)),
        None => true,
    }
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    presented.len() == expected.len()
        && presented.iter().zip(expected).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{sign_body, verify_handshake, verify_secret_token, verify_signature, HandshakeQuery};

    fn secret(value: &str) -> SecretString {
        value.to_owned().into()
    }

    fn query(mode: &str, token: &str, challenge: &str) -> HandshakeQuery {
        HandshakeQuery {
            mode: Some(mode.to_owned()),
            verify_token: Some(token.to_owned()),
            challenge: Some(challenge.to_owned()),
        }
    }

    #[test]
    fn handshake_echoes_challenge_only_for_matching_subscribe() {
        let secret = secret("verify-me");

        assert_eq!(
            verify_handshake(&query("subscribe", "verify-me", "1158201444"), Some(&secret)),
            Some("1158201444".to_owned())
        );
        assert_eq!(verify_handshake(&query("subscribe", "wrong", "1158201444"), Some(&secret)), None);
        assert_eq!(verify_handshake(&query("unsubscribe", "verify-me", "1"), Some(&secret)), None);
        assert_eq!(verify_handshake(&query("subscribe", "verify-me", ""), Some(&secret)), None);
        assert_eq!(verify_handshake(&query("subscribe", "verify-me", "1"), None), None);
    }

    #[test]
    fn signature_must_match_body_when_secret_is_configured() {
        let secret = secret("app-secret");
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let signature = sign_body("app-secret", body).expect("sign");

        assert!(verify_signature(Some(&secret), Some(&signature), body));
        assert!(!verify_signature(Some(&secret), Some(&signature), b"{}"));
        assert!(!verify_signature(Some(&secret), Some("sha256=zz"), body));
        assert!(!verify_signature(Some(&secret), None, body));
        assert!(verify_signature(None, None, body));
    }

    #[test]
    fn secret_token_header_is_compared_exactly() {
        let secret = secret("tg-secret");

        assert!(verify_secret_token(Some(&secret), Some("tg-secret")));
        assert!(!verify_secret_token(Some(&secret), Some("tg-secret ")));
        assert!(!verify_secret_token(Some(&secret), None));
        assert!(verify_secret_token(None, None));
    }
}

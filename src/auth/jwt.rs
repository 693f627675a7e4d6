// src/auth/jwt.rs — HS256 bearer tokens
//
// Compact JWS: base64url(header).base64url(claims).base64url(hmac). Only the
// HS256 header this module emits is accepted back.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::domain::Role;
use crate::infra::crypto::{constant_time_eq, hmac_sha256};
use crate::infra::errors::DeskError;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub clinic_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TokenType,
    pub iat: i64,
    pub exp: i64,
    /// Password-hash fingerprint; only set on reset tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
}

pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, claims: &Claims) -> anyhow::Result<String> {
        let header = URL_SAFE_NO_PAD.encode(HEADER);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header}.{payload}");
        let sig = hmac_sha256(&self.secret, signing_input.as_bytes());
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig)))
    }

    /// Verify signature, expiry and token type against the current clock.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, DeskError> {
        self.verify_at(token, expected, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, expected: TokenType, now: i64) -> Result<Claims, DeskError> {
        let invalid = || DeskError::Unauthorized("invalid token".into());

        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let header_json = URL_SAFE_NO_PAD.decode(header).map_err(|_| invalid())?;
        let header_val: serde_json::Value =
            serde_json::from_slice(&header_json).map_err(|_| invalid())?;
        if header_val.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
            return Err(invalid());
        }

        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| invalid())?;
        let expected_sig = hmac_sha256(&self.secret, format!("{header}.{payload}").as_bytes());
        if !constant_time_eq(&sig, &expected_sig) {
            return Err(invalid());
        }

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.kind != expected {
            return Err(DeskError::Unauthorized("wrong token type".into()));
        }
        if claims.exp <= now {
            return Err(DeskError::Unauthorized("token expired".into()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(kind: TokenType, exp: i64) -> Claims {
        Claims {
            sub: "user-1".into(),
            role: Role::Manager,
            clinic_id: Some("clinic-1".into()),
            kind,
            iat: 1_000,
            exp,
            fp: None,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = TokenSigner::new("a-very-secret-key-123");
        let token = signer.sign(&claims(TokenType::Access, 2_000)).unwrap();
        assert_eq!(token.split('.').count(), 3);
        let back = signer.verify_at(&token, TokenType::Access, 1_500).unwrap();
        assert_eq!(back, claims(TokenType::Access, 2_000));
    }

    #[test]
    fn test_expired_and_wrong_type_rejected() {
        let signer = TokenSigner::new("a-very-secret-key-123");
        let token = signer.sign(&claims(TokenType::Refresh, 2_000)).unwrap();
        assert!(signer.verify_at(&token, TokenType::Refresh, 2_000).is_err());
        assert!(signer.verify_at(&token, TokenType::Access, 1_500).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = TokenSigner::new("a-very-secret-key-123");
        let token = signer.sign(&claims(TokenType::Access, 2_000)).unwrap();
        let mut forged = claims(TokenType::Access, 2_000);
        forged.role = Role::Admin;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(matches!(
            signer.verify_at(&tampered, TokenType::Access, 1_500),
            Err(DeskError::Unauthorized(_))
        ));

        let other = TokenSigner::new("another-secret-key-456");
        assert!(other.verify_at(&token, TokenType::Access, 1_500).is_err());
        assert!(signer.verify_at("not.a.jwt.token", TokenType::Access, 0).is_err());
    }
}

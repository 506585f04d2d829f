//! Room access tokens
//!
//! A token is an HS256 JWT signed with the api secret. The api key is the
//! issuer, the participant identity is the subject and the `video` grant
//! names the room and allows joining it.

use crate::domain::{GatewayError, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default token lifetime
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Room permissions carried by a token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    #[serde(default)]
    pub room_join: bool,
}

/// JWT claims of a room-join token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantClaims {
    /// API key
    pub iss: String,
    /// Participant identity
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default)]
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoGrant>,
}

impl GrantClaims {
    pub fn identity(&self) -> &str {
        &self.sub
    }

    pub fn api_key(&self) -> &str {
        &self.iss
    }
}

/// Signs room-join tokens for one api key/secret pair
pub struct AccessTokenIssuer {
    api_key: String,
    encoding_key: EncodingKey,
}

impl AccessTokenIssuer {
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            encoding_key: EncodingKey::from_secret(api_secret.as_bytes()),
        }
    }

    /// Mint a token that lets `identity` join `room` for `ttl`
    pub fn issue(&self, room: &str, identity: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| GatewayError::Token(format!("token lifetime {:?} is too large", ttl)))?;

        let claims = GrantClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            nbf: now,
            exp,
            jti: identity.to_string(),
            video: Some(VideoGrant {
                room: room.to_string(),
                room_join: true,
            }),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Token(format!("failed to sign token: {}", e)))
    }
}

/// Convenience wrapper minting a token with the default lifetime
pub fn new_access_token(
    api_key: &str,
    api_secret: &str,
    room: &str,
    identity: &str,
) -> Result<String> {
    AccessTokenIssuer::new(api_key, api_secret).issue(room, identity, DEFAULT_TOKEN_TTL)
}

/// A parsed but not yet verified token
pub struct TokenVerifier {
    token: String,
    unverified: GrantClaims,
}

impl TokenVerifier {
    /// Read the claims without checking the signature
    pub fn parse(token: &str) -> Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<GrantClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| GatewayError::Token(format!("malformed token: {}", e)))?;

        Ok(Self {
            token: token.to_string(),
            unverified: data.claims,
        })
    }

    /// Issuer of the token, i.e. the api key it claims to be signed with
    pub fn api_key(&self) -> &str {
        &self.unverified.iss
    }

    pub fn identity(&self) -> &str {
        &self.unverified.sub
    }

    /// Check signature, issuer and validity window against `api_secret`
    pub fn verify(&self, api_secret: &str) -> Result<GrantClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key()]);
        validation.validate_nbf = true;

        let data = decode::<GrantClaims>(
            &self.token,
            &DecodingKey::from_secret(api_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| GatewayError::Token(format!("token verification failed: {}", e)))?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_access_token() {
        let api_key = "test_api_key";
        let api_secret = "test_api_secret";
        let room_name = "test_room";
        let identity = "test_participant";

        let token = new_access_token(api_key, api_secret, room_name, identity).unwrap();
        assert!(!token.is_empty());

        let verifier = TokenVerifier::parse(&token).unwrap();
        assert_eq!(verifier.api_key(), api_key);

        let claims = verifier.verify(api_secret).unwrap();
        let video = claims.video.as_ref().expect("video grant");
        assert_eq!(video.room, room_name);
        assert!(video.room_join);
        assert_eq!(claims.identity(), identity);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = new_access_token("key", "secret", "room", "who").unwrap();
        let verifier = TokenVerifier::parse(&token).unwrap();
        assert!(matches!(verifier.verify("other"), Err(GatewayError::Token(_))));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let now = Utc::now().timestamp();
        let claims = GrantClaims {
            iss: "key".to_string(),
            sub: "who".to_string(),
            nbf: now - 7200,
            exp: now - 3600,
            jti: "who".to_string(),
            video: Some(VideoGrant {
                room: "room".to_string(),
                room_join: true,
            }),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let verifier = TokenVerifier::parse(&token).unwrap();
        assert_eq!(verifier.identity(), "who");
        assert!(verifier.verify("secret").is_err());
    }

    #[test]
    fn test_issue_rejects_overflowing_ttl() {
        let issuer = AccessTokenIssuer::new("key", "secret");

        let result = issuer.issue("room", "who", Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(GatewayError::Token(_))));

        let result = issuer.issue("room", "who", Duration::from_secs(i64::MAX as u64));
        assert!(matches!(result, Err(GatewayError::Token(_))));
    }

    #[test]
    fn test_issue_sets_expiry_from_ttl() {
        let issuer = AccessTokenIssuer::new("key", "secret");
        let token = issuer.issue("room", "who", Duration::from_secs(60)).unwrap();

        let claims = TokenVerifier::parse(&token).unwrap().verify("secret").unwrap();
        assert_eq!(claims.exp - claims.nbf, 60);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TokenVerifier::parse("not-a-token").is_err());
    }

    #[test]
    fn test_grant_serializes_camel_case() {
        let grant = VideoGrant {
            room: "lobby".to_string(),
            room_join: true,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["room"], "lobby");
        assert_eq!(json["roomJoin"], true);
    }
}

//! RS256 token signing and validation.
//!
//! The signing keypair is shared by every cluster peer (see the auth
//! manager's bootstrap), so a token issued by one node validates on all of
//! them. Permissions are snapshotted into the claims at issuance time and
//! are authoritative for later permission checks.

use crate::types::{Permission, SubjectKind};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lodestar_core::{Error, Result};
use lodestar_crypto::RsaKeypair;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default access-token lifetime: 48 hours.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Subject id.
    pub sub: String,
    pub subject_type: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// What the manager knows about a principal at token issuance time.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject_id: String,
    pub kind: SubjectKind,
    pub name: String,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
    pub extra: HashMap<String, String>,
}

/// RS256 signer/validator bound to one keypair, issuer, and audience.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
    public_pem: String,
}

impl JwtService {
    pub fn from_keypair(
        keypair: &RsaKeypair,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self> {
        let issuer = issuer.into();
        let audience = audience.into();

        let encoding_key = EncodingKey::from_rsa_pem(keypair.private_pem().as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(keypair.public_pem().as_bytes())
            .map_err(|e| Error::Crypto(format!("invalid RSA public key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&issuer]);
        validation.set_audience(&[&audience]);
        validation.validate_exp = true;
        validation.leeway = 10; // seconds of clock-skew tolerance

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer,
            audience,
            ttl,
            public_pem: keypair.public_pem().to_string(),
        })
    }

    /// PEM of the verification half, for peers and external validators.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Issue a token for `identity`, valid from now for the service TTL.
    pub fn sign(&self, identity: Identity) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            sub: identity.subject_id,
            subject_type: identity.kind,
            name: identity.name,
            roles: identity.roles,
            permissions: identity.permissions,
            extra: identity.extra,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    /// Validate signature, expiry, issuer, and audience.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(ttl: Duration) -> JwtService {
        let keypair = RsaKeypair::generate().unwrap();
        JwtService::from_keypair(&keypair, "lodestar", "lodestar-api", ttl).unwrap()
    }

    fn identity() -> Identity {
        Identity {
            subject_id: "u1".into(),
            kind: SubjectKind::User,
            name: "User One".into(),
            roles: vec!["admin".into()],
            permissions: vec![Permission::any()],
            extra: HashMap::from([("tenant".into(), "t1".into())]),
        }
    }

    #[test]
    fn test_sign_validate_roundtrip() {
        let svc = service(DEFAULT_TOKEN_TTL);
        let token = svc.sign(identity()).unwrap();
        let claims = svc.validate(&token).unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.subject_type, SubjectKind::User);
        assert_eq!(claims.roles, vec!["admin"]);
        assert_eq!(claims.permissions, vec![Permission::any()]);
        assert_eq!(claims.extra.get("tenant").unwrap(), "t1");
        assert_eq!(claims.exp - claims.iat, DEFAULT_TOKEN_TTL.as_secs() as i64);
    }

    #[test]
    fn test_foreign_key_rejected() {
        let a = service(DEFAULT_TOKEN_TTL);
        let b = service(DEFAULT_TOKEN_TTL);
        let token = a.sign(identity()).unwrap();
        assert!(matches!(
            b.validate(&token),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let keypair = RsaKeypair::generate().unwrap();
        let signer =
            JwtService::from_keypair(&keypair, "lodestar", "other-aud", DEFAULT_TOKEN_TTL).unwrap();
        let validator =
            JwtService::from_keypair(&keypair, "lodestar", "lodestar-api", DEFAULT_TOKEN_TTL)
                .unwrap();
        let token = signer.sign(identity()).unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let svc = service(DEFAULT_TOKEN_TTL);
        assert!(matches!(
            svc.validate("not-a-token"),
            Err(Error::InvalidToken(_))
        ));
    }
}

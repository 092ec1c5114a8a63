//! Compact HS256 tokens for the HTTP and socket surfaces.
//!
//! Header and claims are base64url (no padding) JSON segments signed with
//! HMAC-SHA-256. The subject claim carries the stable user id.

use {
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    chrono::Utc,
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
};

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const ISSUER: &str = "murmur";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: String,
}

pub struct TokenService {
    key: Vec<u8>,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|_| Error::provider("invalid signing key length"))
    }

    /// Issue a signed token whose subject is `user_id`.
    pub fn generate(&self, user_id: &str) -> Result<String> {
        if user_id.is_empty() {
            return Err(Error::invalid_argument("user id is required"));
        }
        let now = Utc::now().timestamp();
        let header = Header {
            alg: "HS256".into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
            iss: ISSUER.into(),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?),
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify the signature, algorithm and expiry; returns the subject.
    pub fn validate(&self, token: &str) -> Result<String> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::unauthorized("malformed token"));
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::unauthorized("unexpected signing method"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| Error::unauthorized("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::unauthorized("invalid signature"))?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::unauthorized("token expired"));
        }
        if claims.sub.is_empty() {
            return Err(Error::unauthorized("subject missing"));
        }
        Ok(claims.sub)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::unauthorized("malformed token segment"))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::unauthorized("malformed token segment"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_recovers_the_subject() {
        let svc = TokenService::new("test-secret", 3600);
        let token = svc.generate("+15550001").unwrap();
        assert_eq!(svc.validate(&token).unwrap(), "+15550001");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = TokenService::new("test-secret", -10);
        let token = svc.generate("+15550001").unwrap();
        assert!(matches!(
            svc.validate(&token),
            Err(Error::Unauthorized { .. })
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = TokenService::new("secret-a", 3600)
            .generate("+15550001")
            .unwrap();
        assert!(TokenService::new("secret-b", 3600).validate(&token).is_err());
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let svc = TokenService::new("test-secret", 3600);
        let token = svc.generate("+15550001").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "+15559999".into(),
                iat: 0,
                exp: i64::MAX,
                iss: ISSUER.into(),
            })
            .unwrap(),
        );
        parts[1] = &forged;
        assert!(svc.validate(&parts.join(".")).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let svc = TokenService::new("test-secret", 3600);
        assert!(svc.validate("").is_err());
        assert!(svc.validate("a.b").is_err());
        assert!(svc.validate("a.b.c.d").is_err());
        assert!(svc.validate("not-a-token").is_err());
    }
}

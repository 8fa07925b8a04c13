//! Signed session tokens.
//!
//! A session is an HS256 JWT with claims `{ sub, role, iat, exp }`. It is the
//! only credential the server accepts: the browser keeps it in the session
//! cookie (or sends it as a bearer token), and both the page guard and the
//! API decode it through [`SessionCodec::decode`].
//!
//! Decoding fails closed. A bad signature, an unknown role, a missing claim or
//! an elapsed expiry all produce an [`AuthError`]; no partially filled
//! [`Session`] is ever handed out.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AuthConfig, MAX_SESSION_TTL_DAYS};

/// Lifetime used when the configured one is out of range
const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Customer => "customer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(Role::Manager),
            "customer" => Ok(Role::Customer),
            other => Err(AuthError::Invalid(format!("unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no session token presented")]
    Missing,
    #[error("session token expired")]
    Expired,
    #[error("invalid session token: {0}")]
    Invalid(String),
    #[error("failed to sign session token: {0}")]
    Encode(String),
}

/// Who is acting: the part of a session that survives re-issuing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

/// A verified session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            role: self.role,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
}

pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    cookie_name: String,
    secure_cookies: bool,
}

impl SessionCodec {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = match config.jwt_secret.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret.to_string(),
            None => {
                tracing::warn!(
                    "No JWT secret configured; generated a per-process secret. \
                     Sessions will not survive a restart."
                );
                generate_secret()
            }
        };

        let ttl_days = if (1..=MAX_SESSION_TTL_DAYS).contains(&config.session_ttl_days) {
            config.session_ttl_days
        } else {
            tracing::warn!(
                "Session lifetime of {} days is out of range; using {} days",
                config.session_ttl_days,
                DEFAULT_TTL_DAYS
            );
            DEFAULT_TTL_DAYS
        };
        let ttl = Duration::days(ttl_days);

        let mut codec = Self::with_secret(&secret, ttl);
        codec.cookie_name = config.cookie_name.clone();
        codec.secure_cookies = config.secure_cookies;
        codec
    }

    pub fn with_secret(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "iat", "exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
            cookie_name: "session".to_string(),
            secure_cookies: false,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign a new session for `identity`, valid for the configured lifetime.
    pub fn encode(&self, identity: &Identity) -> Result<IssuedSession, AuthError> {
        let now = Utc::now();
        let issued_at = now.timestamp();
        let expires_at = (now + self.ttl).timestamp();

        let claims = Claims {
            sub: identity.user_id.clone(),
            role: identity.role,
            iat: issued_at,
            exp: expires_at,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Encode(e.to_string()))?;

        Ok(IssuedSession {
            token,
            session: session_from_claims(claims)?,
        })
    }

    /// Verify a token and return the session it carries.
    pub fn decode(&self, token: &str) -> Result<Session, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        session_from_claims(data.claims)
    }

    /// Re-issue a session for the same identity with a fresh expiry.
    pub fn refresh(&self, session: &Session) -> Result<IssuedSession, AuthError> {
        self.encode(&session.identity())
    }

    /// Session cookie carrying an issued token; it lives as long as the token.
    pub fn session_cookie(&self, issued: &IssuedSession) -> Cookie<'static> {
        let max_age = (issued.session.expires_at - Utc::now()).num_seconds().max(0);
        let mut cookie = self.base_cookie(issued.token.clone());
        cookie.set_max_age(time::Duration::seconds(max_age));
        cookie
    }

    /// Cookie that makes the browser drop the session cookie.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.base_cookie(String::new());
        cookie.make_removal();
        cookie
    }

    fn base_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .build()
    }
}

fn session_from_claims(claims: Claims) -> Result<Session, AuthError> {
    if claims.sub.is_empty() {
        return Err(AuthError::Invalid("empty subject".to_string()));
    }
    let issued_at = DateTime::from_timestamp(claims.iat, 0)
        .ok_or_else(|| AuthError::Invalid("iat out of range".to_string()))?;
    let expires_at = DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| AuthError::Invalid("exp out of range".to_string()))?;

    Ok(Session {
        user_id: claims.sub,
        role: claims.role,
        issued_at,
        expires_at,
    })
}

fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::with_secret("test-secret", Duration::days(7))
    }

    fn customer() -> Identity {
        Identity {
            user_id: "user-1".to_string(),
            role: Role::Customer,
        }
    }

    #[test]
    fn test_roundtrip_preserves_identity() {
        let codec = codec();
        for identity in [
            customer(),
            Identity {
                user_id: "mgr-42".to_string(),
                role: Role::Manager,
            },
        ] {
            let issued = codec.encode(&identity).unwrap();
            let session = codec.decode(&issued.token).unwrap();
            assert_eq!(session.identity(), identity);
            assert_eq!(session, issued.session);
        }
    }

    #[test]
    fn test_session_lifetime_is_seven_days() {
        let issued = codec().encode(&customer()).unwrap();
        let lifetime = issued.session.expires_at - issued.session.issued_at;
        assert_eq!(lifetime, Duration::days(7));
    }

    #[test]
    fn test_out_of_range_lifetime_falls_back() {
        let config = AuthConfig {
            jwt_secret: Some("test-secret".to_string()),
            session_ttl_days: i64::MAX,
            ..AuthConfig::default()
        };
        let issued = SessionCodec::new(&config).encode(&customer()).unwrap();
        let lifetime = issued.session.expires_at - issued.session.issued_at;
        assert_eq!(lifetime, Duration::days(DEFAULT_TTL_DAYS));
    }

    #[test]
    fn test_tampered_token_fails() {
        let codec = codec();
        let token = codec.encode(&customer()).unwrap().token;

        // Change one character inside the claims segment
        let mut chars: Vec<char> = token.chars().collect();
        let target = token.find('.').unwrap() + 5;
        chars[target] = if chars[target] == 'x' { 'y' } else { 'x' };
        let tampered: String = chars.into_iter().collect();

        assert!(matches!(codec.decode(&tampered), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_truncated_token_fails() {
        let codec = codec();
        let token = codec.encode(&customer()).unwrap().token;

        for cut in [1, token.len() / 2, token.len() - 1] {
            assert!(codec.decode(&token[..cut]).is_err());
        }
        assert!(matches!(codec.decode(""), Err(AuthError::Missing)));
        assert!(matches!(codec.decode("not-a-jwt"), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_foreign_secret_fails() {
        let token = SessionCodec::with_secret("other-secret", Duration::days(7))
            .encode(&customer())
            .unwrap()
            .token;
        assert!(codec().decode(&token).is_err());
    }

    #[test]
    fn test_expired_token_fails() {
        let token = SessionCodec::with_secret("test-secret", Duration::seconds(-120))
            .encode(&customer())
            .unwrap()
            .token;
        assert!(matches!(codec().decode(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_unknown_role_fails() {
        #[derive(Serialize)]
        struct Forged {
            sub: String,
            role: String,
            iat: i64,
            exp: i64,
        }

        let now = Utc::now().timestamp();
        let forged = Forged {
            sub: "user-1".to_string(),
            role: "admin".to_string(),
            iat: now,
            exp: now + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &forged,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(matches!(codec().decode(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_missing_claim_fails() {
        #[derive(Serialize)]
        struct NoRole {
            sub: String,
            iat: i64,
            exp: i64,
        }

        let now = Utc::now().timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &NoRole {
                sub: "user-1".to_string(),
                iat: now,
                exp: now + 3600,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(codec().decode(&token).is_err());
    }

    #[test]
    fn test_refresh_keeps_identity() {
        let codec = codec();
        let issued = codec.encode(&customer()).unwrap();
        let refreshed = codec.refresh(&issued.session).unwrap();
        assert_eq!(refreshed.session.identity(), customer());
        assert!(refreshed.session.expires_at >= issued.session.expires_at);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let codec = codec();
        let issued = codec.encode(&customer()).unwrap();
        let cookie = codec.session_cookie(&issued);
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), issued.token);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(false));

        let max_age = cookie.max_age().unwrap().whole_seconds();
        assert!(max_age > Duration::days(7).num_seconds() - 60);
        assert!(max_age <= Duration::days(7).num_seconds());

        let header = cookie.to_string();
        assert!(header.starts_with(&format!("session={}", issued.token)));
        assert!(header.contains("HttpOnly"));
        assert!(!header.contains("Secure"));
    }

    #[test]
    fn test_secure_cookies_when_configured() {
        let config = AuthConfig {
            jwt_secret: Some("test-secret".to_string()),
            secure_cookies: true,
            ..AuthConfig::default()
        };
        let codec = SessionCodec::new(&config);
        let issued = codec.encode(&customer()).unwrap();
        assert_eq!(codec.session_cookie(&issued).secure(), Some(true));
        assert_eq!(codec.removal_cookie().secure(), Some(true));
    }

    #[test]
    fn test_removal_cookie_expires_immediately() {
        let cookie = codec().removal_cookie();
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert!(cookie.to_string().contains("Max-Age=0"));
    }

    #[test]
    fn test_generated_secret_when_unconfigured() {
        let a = SessionCodec::new(&AuthConfig::default());
        let b = SessionCodec::new(&AuthConfig::default());
        let token = a.encode(&customer()).unwrap().token;
        assert!(a.decode(&token).is_ok());
        assert!(b.decode(&token).is_err());
    }
}

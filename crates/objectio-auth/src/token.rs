//! Internode bearer tokens
//!
//! Tokens are HS512 JWTs signed with the cluster secret. Verification
//! checks, in order: the token is present, the signature is valid, the
//! signer is this cluster's access key, the audience equals the raw query
//! string, and the caller's timestamp is within the accepted skew.

use crate::error::AuthError;
use chrono::{DateTime, SecondsFormat, Utc};
use http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use objectio_common::config::CredentialsConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying the bearer token
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header carrying the caller's RFC 3339 timestamp
pub const TIME_HEADER: &str = "x-objectio-time";

/// Accepted clock difference between caller and callee
pub const DEFAULT_MAX_SKEW: Duration = Duration::from_secs(15 * 60);

/// The cluster credential
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl From<&CredentialsConfig> for Credentials {
    fn from(config: &CredentialsConfig) -> Self {
        Self::new(&config.access_key, &config.secret_key)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Token claims
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "accessKey", default, skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    #[serde(default)]
    pub aud: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Sign a token for a call whose raw query string is `audience`
pub fn issue_token(
    credentials: &Credentials,
    audience: &str,
    ttl: Duration,
) -> Result<String, AuthError> {
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let claims = Claims {
        access_key: credentials.access_key.clone(),
        sub: credentials.access_key.clone(),
        aud: audience.to_string(),
        exp: now + ttl.as_secs(),
        iat: now,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(credentials.secret_key.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
}

/// Value for the [`TIME_HEADER`] header
#[must_use]
pub fn request_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Verifies internode requests against the cluster credential
#[derive(Clone, Debug)]
pub struct TokenVerifier {
    credentials: Credentials,
    max_skew: Duration,
}

impl TokenVerifier {
    #[must_use]
    pub const fn new(credentials: Credentials, max_skew: Duration) -> Self {
        Self {
            credentials,
            max_skew,
        }
    }

    /// Verify a request's headers and raw query string against the current time
    pub fn verify(&self, headers: &HeaderMap, raw_query: &str) -> Result<Claims, AuthError> {
        self.verify_at(headers, raw_query, Utc::now())
    }

    /// Verify as of `now`
    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        raw_query: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthError> {
        let token = bearer_token(headers)?;

        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_aud = false;
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.credentials.secret_key.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!("token verification failed: {}", e);
            AuthError::SignatureMismatch
        })?
        .claims;

        let owner = claims.access_key == self.credentials.access_key
            || claims.sub == self.credentials.access_key;
        if !owner {
            return Err(AuthError::CredentialMismatch);
        }

        if claims.aud != raw_query {
            return Err(AuthError::AudienceMismatch);
        }

        let request_time = headers
            .get(TIME_HEADER)
            .ok_or(AuthError::MissingDateHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidDateFormat)?;
        let request_time = DateTime::parse_from_rfc3339(request_time)
            .map_err(|_| AuthError::InvalidDateFormat)?
            .with_timezone(&Utc);

        let delta = now
            .signed_duration_since(request_time)
            .num_milliseconds()
            .unsigned_abs();
        if u128::from(delta) > self.max_skew.as_millis() {
            return Err(AuthError::RequestTimeSkewed);
        }

        Ok(claims)
    }
}

/// Extract the token from the authorization header, tolerating a missing `Bearer` prefix
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION_HEADER)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &value[7..],
        _ => value,
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingAuthHeader);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn creds() -> Credentials {
        Credentials::new("node-key", "node-secret")
    }

    fn headers(token: &str, time: DateTime<Utc>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION_HEADER,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers.insert(
            TIME_HEADER,
            HeaderValue::from_str(&request_time(time)).unwrap(),
        );
        headers
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(creds(), DEFAULT_MAX_SKEW)
    }

    #[test]
    fn test_valid_token_accepted() {
        let query = "disk-id=abc&volume=bucket";
        let token = issue_token(&creds(), query, Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        let claims = verifier().verify_at(&headers(&token, now), query, now).unwrap();
        assert_eq!(claims.access_key, "node-key");
        assert_eq!(claims.aud, query);
    }

    #[test]
    fn test_missing_token() {
        let err = verifier().verify(&HeaderMap::new(), "").unwrap_err();
        assert!(matches!(err, AuthError::MissingAuthHeader));

        let common: objectio_common::Error = err.into();
        assert_eq!(common.http_status_code(), 401);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other = Credentials::new("node-key", "someone-else");
        let token = issue_token(&other, "", Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        let err = verifier().verify_at(&headers(&token, now), "", now).unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn test_foreign_access_key_is_malformed() {
        let other = Credentials::new("other-key", "node-secret");
        let token = issue_token(&other, "", Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        let err = verifier().verify_at(&headers(&token, now), "", now).unwrap_err();
        assert!(matches!(err, AuthError::CredentialMismatch));
        assert!(matches!(
            objectio_common::Error::from(err),
            objectio_common::Error::MalformedAuth(_)
        ));
    }

    #[test]
    fn test_subject_only_owner_accepted() {
        let now = u64::try_from(Utc::now().timestamp()).unwrap();
        let claims = Claims {
            access_key: String::new(),
            sub: "node-key".into(),
            aud: "a=1".into(),
            exp: now + 60,
            iat: now,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"node-secret"),
        )
        .unwrap();
        let now = Utc::now();

        assert!(verifier().verify_at(&headers(&token, now), "a=1", now).is_ok());
    }

    #[test]
    fn test_audience_must_match_raw_query() {
        let token = issue_token(&creds(), "volume=a", Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        let err = verifier()
            .verify_at(&headers(&token, now), "volume=b", now)
            .unwrap_err();
        assert!(matches!(err, AuthError::AudienceMismatch));
    }

    #[test]
    fn test_skew_boundary() {
        let token = issue_token(&creds(), "", Duration::from_secs(60)).unwrap();
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let skew = chrono::Duration::minutes(15);
        let second = chrono::Duration::seconds(1);
        let v = verifier();

        assert!(v.verify_at(&headers(&token, now - skew), "", now).is_ok());
        assert!(v.verify_at(&headers(&token, now + skew), "", now).is_ok());

        let err = v
            .verify_at(&headers(&token, now - skew - second), "", now)
            .unwrap_err();
        assert!(matches!(err, AuthError::RequestTimeSkewed));
        let err = v
            .verify_at(&headers(&token, now + skew + second), "", now)
            .unwrap_err();
        assert!(matches!(err, AuthError::RequestTimeSkewed));
    }

    #[test]
    fn test_missing_or_bad_time_header() {
        let token = issue_token(&creds(), "", Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        let mut h = headers(&token, now);
        h.remove(TIME_HEADER);
        assert!(matches!(
            verifier().verify_at(&h, "", now).unwrap_err(),
            AuthError::MissingDateHeader
        ));

        h.insert(TIME_HEADER, HeaderValue::from_static("yesterday"));
        assert!(matches!(
            verifier().verify_at(&h, "", now).unwrap_err(),
            AuthError::InvalidDateFormat
        ));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        assert!(!format!("{:?}", creds()).contains("node-secret"));
    }
}

//! Hosted identity provider with email/password sign-in.
//!
//! Only session presence matters to the dashboard: a signed-in reviewer may
//! use every route, anyone else only health and sign-in.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// A signed-in reviewer.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub user_email: String,
    pub expires_at: DateTime<Utc>,
}

/// Session details safe to return from the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Does `token` belong to this session?
    pub fn accepts(&self, token: &str) -> bool {
        constant_time_eq(self.access_token.expose_secret().as_bytes(), token.as_bytes())
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            user_email: self.user_email.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Email/password identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Revoke the session upstream. Best-effort.
    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<TokenUser>,
}

#[derive(Deserialize)]
struct TokenUser {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn describe(self) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .unwrap_or_else(|| "sign-in rejected".to_string())
    }
}

/// GoTrue-compatible identity provider (Supabase Auth).
pub struct GoTrueClient {
    client: reqwest::Client,
    config: AuthConfig,
}

impl GoTrueClient {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.config.url)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let resp = self
            .client
            .post(self.url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", self.config.anon_key.expose_secret())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let body: ErrorBody = resp.json().await.unwrap_or_default();
            warn!(email = email, status = %status, "Sign-in rejected");
            return Err(AuthError::InvalidCredentials(body.describe()));
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!(
                "identity provider returned {status}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let session = Session {
            access_token: SecretString::from(token.access_token),
            user_email: token
                .user
                .and_then(|u| u.email)
                .unwrap_or_else(|| email.to_string()),
            expires_at: Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600)),
        };
        info!(email = %session.user_email, "Signed in");
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(self.url("logout"))
            .header("apikey", self.config.anon_key.expose_secret())
            .bearer_auth(session.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::Unavailable(format!(
                "logout returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in_secs: i64) -> Session {
        Session {
            access_token: SecretString::from("tok-1".to_string()),
            user_email: "reviewer@example.com".into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn session_accepts_only_its_token() {
        let s = session(60);
        assert!(s.accepts("tok-1"));
        assert!(!s.accepts("tok-2"));
        assert!(!s.accepts("tok-"));
        assert!(!s.accepts(""));
        assert!(!s.is_expired(Utc::now()));
        assert!(session(-1).is_expired(Utc::now()));
    }

    #[test]
    fn error_body_prefers_description() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        )
        .unwrap();
        assert_eq!(body.describe(), "Invalid login credentials");
        let body: ErrorBody = serde_json::from_str(r#"{"msg":"Email not confirmed"}"#).unwrap();
        assert_eq!(body.describe(), "Email not confirmed");
        assert_eq!(ErrorBody::default().describe(), "sign-in rejected");
    }

    #[test]
    fn urls_are_under_auth_v1() {
        let client = GoTrueClient::new(AuthConfig {
            url: "https://abc.supabase.co".into(),
            anon_key: SecretString::from("anon".to_string()),
        });
        assert_eq!(client.url("token"), "https://abc.supabase.co/auth/v1/token");
    }
}

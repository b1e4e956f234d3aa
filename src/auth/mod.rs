//! Credentials for the spawned agent
//!
//! The agent reads its credentials from its environment. A
//! [`CredentialSource`] gets a chance to edit the spawn environment before
//! the process starts; if it fails, connecting fails with
//! [`AgentError::Authentication`] and nothing is spawned.
//!
//! # Example
//!
//! ```no_run
//! use agent_control_client::auth::ApiKeyCredentials;
//! use agent_control_client::{ClientOptions, SpawnSpec};
//! use std::sync::Arc;
//!
//! let options = ClientOptions::builder()
//!     .spawn(SpawnSpec::new("claude"))
//!     .credentials(Arc::new(ApiKeyCredentials::new("sk-ant-...")))
//!     .build();
//! ```

use std::collections::HashMap;

use crate::error::{AgentError, Result};

/// Environment variable carrying an API key
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable carrying an OAuth access token
pub const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Prepares credentials in the spawn environment
pub trait CredentialSource: Send + Sync {
    /// Edit `env` (the variables layered over the inherited environment)
    ///
    /// # Errors
    /// Returns `Authentication` if valid credentials cannot be provided.
    fn apply(&self, env: &mut HashMap<String, String>) -> Result<()>;
}

/// Injects an API key
#[derive(Clone)]
pub struct ApiKeyCredentials {
    key: String,
}

impl ApiKeyCredentials {
    /// Wrap an API key
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CredentialSource for ApiKeyCredentials {
    fn apply(&self, env: &mut HashMap<String, String>) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(AgentError::authentication("API key is empty"));
        }
        env.insert(API_KEY_VAR.to_string(), self.key.clone());
        Ok(())
    }
}

/// Injects an OAuth access token obtained elsewhere
#[derive(Clone)]
pub struct OAuthTokenCredentials {
    access_token: String,
    expires_at: Option<u64>,
}

impl OAuthTokenCredentials {
    /// Wrap a token that does not expire (or whose expiry is unknown)
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Set the expiry as a Unix timestamp in seconds
    #[must_use]
    pub fn expires_at(mut self, unix_secs: u64) -> Self {
        self.expires_at = Some(unix_secs);
        self
    }

    fn is_expired(&self) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now >= expires_at
    }
}

impl std::fmt::Debug for OAuthTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenCredentials")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CredentialSource for OAuthTokenCredentials {
    fn apply(&self, env: &mut HashMap<String, String>) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(AgentError::authentication("OAuth token is empty"));
        }
        if self.is_expired() {
            return Err(AgentError::authentication("OAuth token has expired"));
        }
        env.insert(OAUTH_TOKEN_VAR.to_string(), self.access_token.clone());
        Ok(())
    }
}

/// Requires credentials to already be present
///
/// Checks the spawn environment first, then the current process environment
/// that the child inherits. Nothing is modified.
#[derive(Debug, Clone)]
pub struct InheritedCredentials {
    vars: Vec<String>,
}

impl InheritedCredentials {
    /// Accept either an API key or an OAuth token
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: vec![API_KEY_VAR.to_string(), OAUTH_TOKEN_VAR.to_string()],
        }
    }

    /// Accept only the given variables
    pub fn with_vars<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for InheritedCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for InheritedCredentials {
    fn apply(&self, env: &mut HashMap<String, String>) -> Result<()> {
        let present = self.vars.iter().any(|var| {
            env.get(var).is_some_and(|v| !v.is_empty())
                || std::env::var(var).is_ok_and(|v| !v.is_empty())
        });
        if present {
            Ok(())
        } else {
            Err(AgentError::authentication(format!(
                "None of [{}] is set",
                self.vars.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_injected() {
        let mut env = HashMap::new();
        ApiKeyCredentials::new("sk-test").apply(&mut env).unwrap();
        assert_eq!(env.get(API_KEY_VAR).map(String::as_str), Some("sk-test"));

        let err = ApiKeyCredentials::new("  ").apply(&mut env).unwrap_err();
        assert!(matches!(err, AgentError::Authentication(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut env = HashMap::new();
        let err = OAuthTokenCredentials::new("tok")
            .expires_at(1)
            .apply(&mut env)
            .unwrap_err();
        assert!(matches!(err, AgentError::Authentication(_)));
        assert!(env.is_empty());

        OAuthTokenCredentials::new("tok").apply(&mut env).unwrap();
        assert_eq!(env.get(OAUTH_TOKEN_VAR).map(String::as_str), Some("tok"));
    }

    #[test]
    fn test_inherited_checks_spawn_env() {
        let source = InheritedCredentials::with_vars(["AGENT_CONTROL_CLIENT_TEST_CREDENTIAL"]);
        let mut env = HashMap::new();
        assert!(source.apply(&mut env).is_err());

        env.insert(
            "AGENT_CONTROL_CLIENT_TEST_CREDENTIAL".to_string(),
            "x".to_string(),
        );
        assert!(source.apply(&mut env).is_ok());
    }

    #[test]
    fn test_debug_redacts() {
        let debug = format!("{:?}", ApiKeyCredentials::new("sk-secret"));
        assert!(!debug.contains("sk-secret"));
    }
}

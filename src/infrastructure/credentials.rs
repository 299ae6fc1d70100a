//! Credential Provider
//!
//! Exchange API credentials are fetched on demand through this trait; the
//! core never caches or persists them. Encryption at rest belongs to the
//! component that stores them, not here.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("missing environment variable {0}")]
    Missing(String),
}

#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

pub trait CredentialProvider: Send + Sync {
    /// Decrypted key/secret, fetched on demand.
    fn credentials(&self) -> Result<ExchangeCredentials, CredentialError>;
}

/// Reads credentials from the environment.
pub struct EnvCredentials {
    key_var: String,
    secret_var: String,
}

impl EnvCredentials {
    pub fn new(key_var: impl Into<String>, secret_var: impl Into<String>) -> Self {
        EnvCredentials {
            key_var: key_var.into(),
            secret_var: secret_var.into(),
        }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        EnvCredentials::new("ARUS_API_KEY", "ARUS_API_SECRET")
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Result<ExchangeCredentials, CredentialError> {
        let api_key = std::env::var(&self.key_var)
            .map_err(|_| CredentialError::Missing(self.key_var.clone()))?;
        let api_secret = std::env::var(&self.secret_var)
            .map_err(|_| CredentialError::Missing(self.secret_var.clone()))?;
        Ok(ExchangeCredentials {
            api_key,
            api_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_credentials_round_trip() {
        std::env::set_var("ARUS_TEST_KEY", "k");
        std::env::set_var("ARUS_TEST_SECRET", "s");
        let provider = EnvCredentials::new("ARUS_TEST_KEY", "ARUS_TEST_SECRET");
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.api_key, "k");
        assert_eq!(creds.api_secret, "s");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let provider = EnvCredentials::new("ARUS_TEST_ABSENT", "ARUS_TEST_ABSENT_2");
        assert!(matches!(
            provider.credentials(),
            Err(CredentialError::Missing(_))
        ));
    }
}

//! Provider configuration: turns provider-level credentials into a
//! configured [`RepoClient`].

use tracing::info;

use crate::config::{ClientConfig, ProviderConfig};
use crate::errors::ConfigError;
use crate::git::{Credentials, RepoClient};

/// Build the client shared by every managed file.
///
/// Both the username and the resolved password are required.
pub fn configure(provider: &ProviderConfig, client: &ClientConfig) -> Result<RepoClient, ConfigError> {
    if provider.username.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "provider.username".into(),
            detail: "username must not be empty".into(),
        });
    }
    let password = provider
        .password
        .as_deref()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "provider.password_env".into(),
            detail: format!(
                "environment variable '{}' is not set",
                provider.password_env
            ),
        })?;

    info!(
        username = %provider.username,
        clone_depth = client.clone_depth,
        max_push_retries = client.max_push_retries,
        "configured repository client"
    );
    Ok(RepoClient::new(
        Credentials::new(provider.username.clone(), password),
        client.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(password: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            username: "bot".into(),
            password_env: "GITFILE_PASSWORD".into(),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_configure_with_credentials() {
        let client = configure(&provider(Some("s3cret")), &ClientConfig::default()).unwrap();
        assert_eq!(client.config().max_push_retries, 3);
        assert!(!format!("{:?}", client).contains("s3cret"));
    }

    #[test]
    fn test_configure_requires_password() {
        let result = configure(&provider(None), &ClientConfig::default());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "provider.password_env"
        ));
    }

    #[test]
    fn test_configure_requires_username() {
        let mut p = provider(Some("s3cret"));
        p.username.clear();
        assert!(configure(&p, &ClientConfig::default()).is_err());
    }
}

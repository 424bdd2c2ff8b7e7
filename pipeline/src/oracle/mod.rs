//! Oracle implementations selectable by configuration.
//!
//! - [`KeywordOracle`]: deterministic substring classifier, no I/O
//! - [`AnthropicOracle`]: asks a Claude model for a root cause or next step
//!
//! [`build_oracle`] picks one from [`OracleConfig`].

mod anthropic;
mod keyword;

pub use anthropic::AnthropicOracle;
pub use keyword::{Category, KeywordOracle};

use crate::config::{ConfigError, OracleConfig, OracleProvider};
use std::sync::Arc;
use triage_anthropic::{AnthropicClient, ClaudeError};
use triage_core::oracle::Oracle;

/// Construct the configured oracle.
///
/// # Errors
///
/// Returns [`ConfigError::MissingApiKey`] if the anthropic provider is selected
/// without a usable key, or [`ConfigError::OracleClient`] if its HTTP client
/// cannot be built.
pub fn build_oracle(config: &OracleConfig) -> Result<Arc<dyn Oracle>, ConfigError> {
    match config.provider {
        OracleProvider::Keyword => Ok(Arc::new(KeywordOracle::new())),
        OracleProvider::Anthropic => {
            let key = config.api_key.clone().ok_or(ConfigError::MissingApiKey)?;
            let client = AnthropicClient::new(key).map_err(client_error)?;
            Ok(Arc::new(AnthropicOracle::new(client, config.model.clone())))
        }
    }
}

fn client_error(error: ClaudeError) -> ConfigError {
    match error {
        ClaudeError::MissingApiKey => ConfigError::MissingApiKey,
        other => ConfigError::OracleClient(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(provider: OracleProvider, api_key: Option<&str>) -> OracleConfig {
        OracleConfig {
            provider,
            api_key: api_key.map(str::to_string),
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn keyword_is_selected_by_name() {
        let oracle = build_oracle(&config(OracleProvider::Keyword, None)).unwrap();
        assert_eq!(oracle.name(), "keyword");
    }

    #[test]
    fn anthropic_needs_a_key() {
        assert!(matches!(
            build_oracle(&config(OracleProvider::Anthropic, None)),
            Err(ConfigError::MissingApiKey)
        ));
        let oracle = build_oracle(&config(OracleProvider::Anthropic, Some("sk-test"))).unwrap();
        assert_eq!(oracle.name(), "anthropic");
    }

    #[test]
    fn blank_key_is_reported_as_missing() {
        assert!(matches!(
            build_oracle(&config(OracleProvider::Anthropic, Some("   "))),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn client_build_failure_keeps_its_cause() {
        let err = client_error(ClaudeError::ClientBuild("no TLS backend".to_string()));
        assert_eq!(
            err,
            ConfigError::OracleClient("Failed to build HTTP client: no TLS backend".to_string())
        );
    }
}

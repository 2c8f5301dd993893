//! LLM credentials from a JSON key file.
//!
//! Vision OCR and Markdown cleanup both need an `edgequake-llm` provider.
//! The key file names the provider and carries its secret so the CLI can be
//! run without exporting variables by hand:
//!
//! ```json
//! {
//!   "provider": "openai",
//!   "model": "gpt-4.1-nano",
//!   "api_key": "sk-...",
//!   "env": { "OPENAI_BASE_URL": "https://proxy.internal/v1" }
//! }
//! ```
//!
//! Variables already present in the process environment win over the file.

use crate::error::ConvertError;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Where the CLI looks when `--keyfile` is not given.
pub const DEFAULT_KEY_FILE: &str = "keys/key.json";

/// Model used when the key file does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Key file '{path}' could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key file '{path}' is not valid: {detail}")]
    Invalid { path: PathBuf, detail: String },

    #[error("Provider '{provider}' could not be created: {detail}")]
    Provider { provider: String, detail: String },
}

impl From<CredentialsError> for ConvertError {
    fn from(e: CredentialsError) -> Self {
        ConvertError::Configuration(e.to_string())
    }
}

/// Parsed contents of a key file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Credentials {
    /// Read and parse `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|detail| CredentialsError::Invalid {
            path: path.to_path_buf(),
            detail,
        })
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let creds: Credentials = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        if creds.provider.trim().is_empty() {
            return Err("\"provider\" must not be empty".to_string());
        }
        Ok(creds)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Export the key and extra variables, skipping any already set.
    ///
    /// Returns the names of the variables that were set.
    pub fn export_env(&self) -> Vec<String> {
        let mut pairs: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let (Some(key), Some(var)) = (&self.api_key, api_key_var(&self.provider)) {
            pairs.push((var.to_string(), key.clone()));
        }

        let mut exported = Vec::new();
        for (name, value) in pairs {
            if std::env::var_os(&name).is_some() {
                debug!("{} already set, leaving it", name);
                continue;
            }
            std::env::set_var(&name, value);
            exported.push(name);
        }
        exported
    }

    /// Export the environment and build the provider.
    pub fn provider(&self) -> Result<Arc<dyn LLMProvider>, CredentialsError> {
        let exported = self.export_env();
        info!(
            "LLM provider '{}' model '{}' ({} variables exported from key file)",
            self.provider,
            self.model(),
            exported.len()
        );
        ProviderFactory::create_llm_provider(&self.provider, self.model()).map_err(|e| {
            CredentialsError::Provider {
                provider: self.provider.clone(),
                detail: e.to_string(),
            }
        })
    }
}

/// Conventional API key variable for a provider name.
pub fn api_key_var(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" | "claude" => Some("ANTHROPIC_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "xai" | "grok" => Some("XAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "azure" | "azure_openai" => Some("AZURE_OPENAI_API_KEY"),
        _ => None,
    }
}

/// Load `path` and build its provider in one step.
pub fn load_provider(path: impl AsRef<Path>) -> Result<Arc<dyn LLMProvider>, CredentialsError> {
    Credentials::load(path)?.provider()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn key_file(json: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_full_key_file() {
        let f = key_file(
            r#"{"provider":"openai","model":"gpt-4.1-mini","api_key":"sk-test","env":{"A":"1"}}"#,
        );
        let creds = Credentials::load(f.path()).unwrap();
        assert_eq!(creds.provider, "openai");
        assert_eq!(creds.model(), "gpt-4.1-mini");
        assert_eq!(creds.api_key.as_deref(), Some("sk-test"));
        assert_eq!(creds.env.get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn model_defaults() {
        let f = key_file(r#"{"provider":"anthropic"}"#);
        assert_eq!(Credentials::load(f.path()).unwrap().model(), DEFAULT_MODEL);
    }

    #[test]
    fn provider_is_required() {
        let f = key_file(r#"{"api_key":"sk"}"#);
        assert!(matches!(
            Credentials::load(f.path()),
            Err(CredentialsError::Invalid { .. })
        ));
        let f = key_file(r#"{"provider":"  "}"#);
        assert!(Credentials::load(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_unreadable_and_a_configuration_error() {
        let err = Credentials::load("/nonexistent/key.json").unwrap_err();
        assert!(matches!(err, CredentialsError::Unreadable { .. }));
        assert!(matches!(ConvertError::from(err), ConvertError::Configuration(_)));
    }

    #[test]
    fn export_keeps_existing_variables() {
        std::env::set_var("FILE2MD_TEST_PRESET", "keep");
        let creds = Credentials {
            provider: "ollama".into(),
            model: None,
            api_key: Some("ignored".into()),
            env: BTreeMap::from([
                ("FILE2MD_TEST_PRESET".to_string(), "overwrite".to_string()),
                ("FILE2MD_TEST_FRESH".to_string(), "new".to_string()),
            ]),
        };
        let exported = creds.export_env();
        assert_eq!(exported, vec!["FILE2MD_TEST_FRESH".to_string()]);
        assert_eq!(std::env::var("FILE2MD_TEST_PRESET").unwrap(), "keep");
        assert_eq!(std::env::var("FILE2MD_TEST_FRESH").unwrap(), "new");
    }

    #[test]
    fn key_variable_names() {
        assert_eq!(api_key_var("OpenAI"), Some("OPENAI_API_KEY"));
        assert_eq!(api_key_var("gemini"), Some("GEMINI_API_KEY"));
        assert_eq!(api_key_var("ollama"), None);
    }
}

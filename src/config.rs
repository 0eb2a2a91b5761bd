//! Process configuration, read from the environment
//!
//! | Variable                       | Default                           |
//! |--------------------------------|-----------------------------------|
//! | `AZURE_OPENAI_ENDPOINT`        | required                          |
//! | `AZURE_OPENAI_DEPLOYMENT_NAME` | `gpt-35-turbo-16k`                |
//! | `AZURE_OPENAI_API_VERSION`     | `2024-02-15-preview`              |
//! | `AGENT_SYSTEM_PROMPT`          | `You are a helpful AI assistant.` |
//! | `AGENT_GITHUB_REPO`            | bootstrap skipped when unset      |
//! | `AGENT_CLONE_DIR`              | bootstrap skipped when unset      |
//! | `AGENT_PYTHON`                 | `python3`                         |
//! | `AZURE_OPENAI_AD_TOKEN`        | unset                             |
//! | `AZURE_TENANT_ID` etc.         | unset                             |
//! | `AZURE_AUTHORITY_HOST`         | `https://login.microsoftonline.com` |
//!
//! Empty values count as unset.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::llm::prompt::DEFAULT_SYSTEM_PROMPT;

pub const DEFAULT_DEPLOYMENT: &str = "gpt-35-turbo-16k";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{set} is set but {missing} is not; set both to bootstrap, or neither to skip")]
    IncompleteBootstrap {
        set: &'static str,
        missing: &'static str,
    },
}

/// Everything the agent needs to start
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub system_prompt: String,
    pub bootstrap: Option<BootstrapConfig>,
    pub credentials: CredentialConfig,
}

/// Repository to clone or update before the session starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub repo_url: String,
    pub clone_dir: PathBuf,
    pub python: String,
}

/// Inputs for choosing a token credential
#[derive(Clone, Default)]
pub struct CredentialConfig {
    pub static_token: Option<String>,
    pub client_secret: Option<ClientSecretConfig>,
    pub authority_host: String,
}

#[derive(Clone)]
pub struct ClientSecretConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

const REDACTED: &str = "<redacted>";

// Secrets never reach Debug output
impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("static_token", &self.static_token.as_ref().map(|_| REDACTED))
            .field("client_secret", &self.client_secret)
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

impl fmt::Debug for ClientSecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .finish()
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let endpoint =
            get("AZURE_OPENAI_ENDPOINT").ok_or(ConfigError::Missing("AZURE_OPENAI_ENDPOINT"))?;

        let bootstrap = match (get("AGENT_GITHUB_REPO"), get("AGENT_CLONE_DIR")) {
            (Some(repo_url), Some(clone_dir)) => Some(BootstrapConfig {
                repo_url,
                clone_dir: PathBuf::from(clone_dir),
                python: get("AGENT_PYTHON").unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::IncompleteBootstrap {
                    set: "AGENT_GITHUB_REPO",
                    missing: "AGENT_CLONE_DIR",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteBootstrap {
                    set: "AGENT_CLONE_DIR",
                    missing: "AGENT_GITHUB_REPO",
                })
            }
        };

        let client_secret = match (
            get("AZURE_TENANT_ID"),
            get("AZURE_CLIENT_ID"),
            get("AZURE_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ClientSecretConfig {
                tenant_id,
                client_id,
                client_secret,
            }),
            _ => None,
        };

        Ok(Self {
            endpoint,
            deployment: get("AZURE_OPENAI_DEPLOYMENT_NAME")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
            api_version: get("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            system_prompt: get("AGENT_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            bootstrap,
            credentials: CredentialConfig {
                static_token: get("AZURE_OPENAI_AD_TOKEN"),
                client_secret,
                authority_host: get("AZURE_AUTHORITY_HOST")
                    .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            },
        })
    }
}

//! chat-agent - terminal chat client for Azure `OpenAI`
//!
//! Bootstraps the configured repository, then runs an interactive session
//! that sends each line, with the earlier lines as context, to a chat
//! completion deployment and prints the reply.

mod bootstrap;
mod config;
mod llm;
mod memory;
mod session;

use bootstrap::{Bootstrap, ProcessRunner};
use config::AgentConfig;
use llm::auth::{default_credential, BearerTokenProvider, COGNITIVE_SERVICES_SCOPE};
use llm::{AzureOpenAIService, LlmService, LoggingService, PromptAssembler};
use session::Session;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = AgentConfig::from_env()?;

    match &config.bootstrap {
        Some(bootstrap) => {
            Bootstrap::new(bootstrap)
                .run(&ProcessRunner, &mut std::io::stderr())
                .await?;
        }
        None => tracing::info!("AGENT_GITHUB_REPO and AGENT_CLONE_DIR unset, skipping bootstrap"),
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("chat-agent/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let tokens = Arc::new(BearerTokenProvider::new(
        default_credential(&config.credentials, client.clone()),
        COGNITIVE_SERVICES_SCOPE,
    ));
    tracing::info!(
        endpoint = %config.endpoint,
        deployment = %config.deployment,
        api_version = %config.api_version,
        credential = tokens.credential_name(),
        "Completion service configured"
    );

    let azure = AzureOpenAIService::new(
        client,
        tokens,
        &config.endpoint,
        config.deployment.clone(),
        &config.api_version,
    );
    let service: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(azure)));

    let mut session = Session::new(PromptAssembler::new(service, config.system_prompt));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session.run(stdin, tokio::io::stdout()).await?;

    Ok(())
}

/// Logs go to stderr so stdout carries only the conversation.
/// `AGENT_LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_agent=warn"));
    let json = std::env::var("AGENT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

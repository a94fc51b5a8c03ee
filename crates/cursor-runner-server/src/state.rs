//! Process-wide state shared across handlers: the Async Execution Facade,
//! the Conversation Store, and the shutdown cancellation token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cursor_runner_core::agent_cli::AgentCliOptions;
use cursor_runner_core::callback::{CallbackDispatcher, FeatureGate};
use cursor_runner_core::cancel::CancelToken;
use cursor_runner_core::conversation::{ConversationStore, InMemoryBackend, RedisBackend};
use cursor_runner_core::config::SupervisorSettings;
use cursor_runner_core::facade::AsyncExecutionFacade;
use cursor_runner_core::semaphore::AdmissionSemaphore;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<AsyncExecutionFacade>,
    pub conversations: Arc<ConversationStore>,
    pub semaphore: Arc<AdmissionSemaphore>,
    pub shutdown: CancelToken,
}

impl AppState {
    pub async fn build(settings: SupervisorSettings) -> anyhow::Result<Self> {
        let semaphore = Arc::new(AdmissionSemaphore::new(settings.cursor_cli_max_concurrent));

        let backend: Arc<dyn cursor_runner_core::conversation::ConversationBackend> =
            match &settings.redis_url {
                Some(url) => {
                    Arc::new(RedisBackend::connect(url, settings.redis_key_prefix.clone(), settings.ttl_seconds).await?)
                }
                None => Arc::new(InMemoryBackend::new(Duration::from_secs(settings.ttl_seconds))),
            };
        let conversations = Arc::new(ConversationStore::new(backend));

        let voice_agent_enabled = std::env::var("FEATURE_VOICE_AGENT_CALLBACKS")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on"))
            .unwrap_or(false);
        let dispatcher = Arc::new(CallbackDispatcher::new(
            settings.webhook_secret.clone(),
            vec![FeatureGate { hostname_contains: "voice-agent".to_string(), enabled: voice_agent_enabled }],
        ));

        let cli_options = AgentCliOptions {
            model: std::env::var("CURSOR_CLI_MODEL").ok().filter(|v| !v.is_empty()),
            approve_mcps: std::env::var("CURSOR_CLI_APPROVE_MCPS")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on"))
                .unwrap_or(false),
        };

        let workspace_root = std::env::var("REPOSITORY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./repositories"));

        let facade = Arc::new(AsyncExecutionFacade::new(
            Arc::clone(&semaphore),
            Arc::clone(&conversations),
            dispatcher,
            settings,
            cli_options,
            workspace_root,
        ));

        Ok(Self { facade, conversations, semaphore, shutdown: CancelToken::new() })
    }
}

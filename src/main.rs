mod config;
mod core;
mod interfaces;
mod logging;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::core::chat::{ChatOrchestrator, LocalDiskStorage, TextFileParser};
use crate::core::credentials::StoreCredentialProvider;
use crate::core::llm::{CompletionClient, OpenAiClient};
use crate::core::store::ConversationStore;
use crate::core::worker::{ToolInvoker, WorkerSupervisor};
use crate::interfaces::web::{ApiServer, AppState};

#[tokio::main]
async fn main() {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    logging::init(log_tx.clone());

    if let Err(e) = run(log_tx).await {
        error!("deskflow failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(log_tx: tokio::sync::broadcast::Sender<String>) -> Result<()> {
    let config = ServerConfig::from_env()?;
    if config.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; chat completions will fail");
    }

    let store = Arc::new(ConversationStore::open(&config.data_dir).await?);

    let credentials = Arc::new(StoreCredentialProvider::new(store.clone()));
    let supervisor = Arc::new(WorkerSupervisor::new(config.worker.clone(), credentials));
    // Boot without user credentials; a login or /api/mcp/restart re-injects
    // them. A worker that fails to spawn must not take the server down.
    if let Err(e) = supervisor.start(None).await {
        warn!("Tool worker failed to start: {:#}", e);
    }

    let completions: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        store.clone(),
        completions,
        Arc::new(ToolInvoker::new(supervisor.clone())),
        Arc::new(LocalDiskStorage::new(config.data_dir.join("uploads"))),
        Arc::new(TextFileParser),
        config.tool_timeout,
    ));

    let state = AppState {
        store,
        supervisor: supervisor.clone(),
        orchestrator,
        log_tx,
        environment: config.environment.clone(),
        frontend_url: config.frontend_url.clone(),
    };

    ApiServer::new(state, config.host.clone(), config.port)
        .serve()
        .await?;

    supervisor.stop().await;
    info!("Shutdown complete");
    Ok(())
}

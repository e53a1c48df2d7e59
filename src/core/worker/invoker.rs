use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::WorkerSupervisor;
use crate::core::error::ToolCallError;

/// Seam between the orchestrator and whatever executes tools. The production
/// implementation talks to the supervised worker; tests substitute doubles.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolCallError>;
}

/// Performs one tool call against the currently running worker. Holds no
/// lock shared with the start/restart path, so a hung invocation can never
/// block a restart.
pub struct ToolInvoker {
    supervisor: Arc<WorkerSupervisor>,
}

impl ToolInvoker {
    pub fn new(supervisor: Arc<WorkerSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl ToolExecutor for ToolInvoker {
    async fn execute(
        &self,
        name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolCallError> {
        if name.trim().is_empty() {
            return Err(ToolCallError::Invocation("tool name is empty".to_string()));
        }
        if timeout.is_zero() {
            return Err(ToolCallError::Invocation(
                "timeout must be positive".to_string(),
            ));
        }

        // No blocking wait for readiness; callers decide whether to retry.
        let handle = self
            .supervisor
            .ready_handle()
            .await
            .ok_or(ToolCallError::WorkerNotReady)?;

        debug!("Invoking tool [{}]", name);
        handle.call(name, args, timeout).await
    }
}

mod invoker;

pub use invoker::{ToolExecutor, ToolInvoker};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::core::error::ToolCallError;
use crate::core::credentials::CredentialProvider;

/// Fixed marker line on the worker's stdout signalling it can serve tool
/// calls. Anything else on stdout is either a JSON response or worker noise.
pub const READINESS_SENTINEL: &str = "MCP server ready";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// How long a terminated worker gets to exit before SIGKILL.
    pub stop_grace: Duration,
}

impl WorkerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            stop_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub ready: bool,
    pub running: bool,
    pub pid: Option<u32>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    id: u64,
    tool: &'a str,
    args: &'a Value,
}

#[derive(Deserialize, Debug)]
struct WireResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<WireResponse>>>>;

/// One spawned worker process. Owned by the supervisor slot; invocations go
/// through `call`, termination through `request_stop`. The process itself is
/// held by the exit-watcher task, which is the only place that waits on it.
pub struct WorkerHandle {
    pid: u32,
    /// Whose credentials were injected at spawn time, if any.
    user_id: Option<String>,
    ready: AtomicBool,
    running: AtomicBool,
    next_id: AtomicU64,
    pending: PendingMap,
    tx_req: mpsc::Sender<String>,
    stop_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
    stderr: Arc<Mutex<String>>,
}

impl WorkerHandle {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        if let Ok(mut guard) = self.stop_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Send one tool call and wait for its correlated response. A worker
    /// exit or replacement drops the pending sender, so an in-flight call
    /// resolves with `WorkerNotReady` instead of hanging.
    pub(crate) async fn call(
        &self,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolCallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = WireRequest { id, tool, args };
        let line = serde_json::to_string(&req)
            .map_err(|e| ToolCallError::Invocation(format!("unserializable arguments: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.tx_req.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ToolCallError::WorkerNotReady);
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ToolCallError::Timeout(timeout))
            }
            Ok(Err(_)) => Err(ToolCallError::WorkerNotReady),
            Ok(Ok(resp)) => {
                if resp.ok {
                    Ok(resp.result.unwrap_or(Value::Null))
                } else {
                    Err(ToolCallError::Invocation(
                        resp.error.unwrap_or_else(|| "unknown worker error".to_string()),
                    ))
                }
            }
        }
    }
}

/// Owns the zero-or-one tool worker process for this server instance.
/// Start/restart is serialized by `start_lock`; readers (`status`, the
/// invoker) go through the guarded `active` slot and never see a stale copy.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    credentials: Arc<dyn CredentialProvider>,
    active: RwLock<Option<Arc<WorkerHandle>>>,
    start_lock: Mutex<()>,
    last_exit: Arc<std::sync::Mutex<Option<i32>>>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
            active: RwLock::new(None),
            start_lock: Mutex::new(()),
            last_exit: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Start (or replace) the worker. Any existing process is terminated and
    /// its exit awaited before the new one is spawned, so two workers never
    /// coexist. Returns once the new process is spawned; readiness flips
    /// asynchronously when the sentinel line is observed.
    pub async fn start(&self, user_id: Option<&str>) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        info!("Starting tool worker: {}", self.config.command);

        self.shutdown_current().await;

        let mut env: HashMap<String, String> = std::env::vars().collect();
        if let Some(user_id) = user_id {
            match self.credentials.tokens_for(user_id).await {
                Ok(Some(tokens)) => {
                    env.insert("GOOGLE_ACCESS_TOKEN".to_string(), tokens.access_token);
                    if let Some(rt) = tokens.refresh_token {
                        env.insert("GOOGLE_REFRESH_TOKEN".to_string(), rt);
                    }
                    if let Some(it) = tokens.id_token {
                        env.insert("GOOGLE_ID_TOKEN".to_string(), it);
                    }
                    if let Some(exp) = tokens.expires_at {
                        env.insert("GOOGLE_TOKEN_EXPIRES_AT".to_string(), exp);
                    }
                    info!("Google tokens loaded for worker");
                }
                Ok(None) => {
                    info!("No stored credentials for user; worker starts without Google tokens")
                }
                Err(e) => warn!("Failed to load credentials for worker: {}", e),
            }
        }

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow!("worker exited before its pid could be read"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to open worker stdout"))?;
        let stderr_pipe = child.stderr.take();

        let (tx_req, mut rx_req) = mpsc::channel::<String>(100);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let handle = Arc::new(WorkerHandle {
            pid,
            user_id: user_id.map(|s| s.to_string()),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            tx_req,
            stop_tx: std::sync::Mutex::new(Some(stop_tx)),
            exited: exit_rx,
            stderr: stderr_buf.clone(),
        });

        // Writer: serialized requests out over stdin, one JSON line each.
        let mut stdin_writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx_req.recv().await {
                debug!("worker TX: {}", msg);
                if let Err(e) = stdin_writer.write_all(format!("{}\n", msg).as_bytes()).await {
                    error!("Failed to write to worker stdin: {}", e);
                    break;
                }
                let _ = stdin_writer.flush().await;
            }
        });

        // Stdout reader: watches for the readiness sentinel, routes JSON
        // responses to their pending callers, logs everything else.
        let reader_handle = handle.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if !reader_handle.ready.load(Ordering::SeqCst)
                    && line.contains(READINESS_SENTINEL)
                {
                    info!("Tool worker is ready (pid {})", reader_handle.pid);
                    reader_handle.ready.store(true, Ordering::SeqCst);
                    continue;
                }
                match serde_json::from_str::<WireResponse>(&line) {
                    Ok(resp) => {
                        let mut p = reader_handle.pending.lock().await;
                        if let Some(tx) = p.remove(&resp.id) {
                            let _ = tx.send(resp);
                        } else {
                            warn!("Worker response with unknown id {}", resp.id);
                        }
                    }
                    Err(_) => debug!("worker stdout: {}", line),
                }
            }
            debug!("Worker stdout closed (pid {})", reader_handle.pid);
        });

        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = stderr_buf.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = stderr_log.lock().await;
                    if s.len() < 4000 {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("worker stderr: {}", line);
                }
            });
        }

        // Exit watcher: the only owner of the Child. Handles both unexpected
        // exits and stop requests (TERM, bounded wait, then KILL), then fails
        // every pending invocation by dropping its sender.
        let watcher_handle = handle.clone();
        let last_exit = self.last_exit.clone();
        let grace = self.config.stop_grace;
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = stop_rx => terminate(&mut child, grace).await,
            };
            watcher_handle.ready.store(false, Ordering::SeqCst);
            watcher_handle.running.store(false, Ordering::SeqCst);
            match &status {
                Ok(s) if s.success() => info!("Worker exited cleanly (pid {})", watcher_handle.pid),
                Ok(s) => {
                    let stderr = watcher_handle.stderr.lock().await;
                    warn!(
                        "Worker exited unexpectedly (pid {}, user {:?}): {}. Stderr: {}",
                        watcher_handle.pid, watcher_handle.user_id, s, stderr
                    );
                }
                Err(e) => warn!("Failed to observe worker exit: {}", e),
            }
            if let Ok(mut last) = last_exit.lock() {
                *last = status.ok().and_then(|s| s.code());
            }
            watcher_handle.pending.lock().await.clear();
            let _ = exit_tx.send(true);
        });

        *self.active.write().await = Some(handle);
        Ok(())
    }

    /// Same as `start`; used after a credential refresh or on operator
    /// request.
    pub async fn restart(&self, user_id: Option<&str>) -> Result<()> {
        self.start(user_id).await
    }

    /// Terminate the current worker, if any, and await its exit.
    pub async fn stop(&self) {
        let _guard = self.start_lock.lock().await;
        self.shutdown_current().await;
    }

    async fn shutdown_current(&self) {
        let old = self.active.write().await.take();
        if let Some(old) = old {
            info!("Terminating existing worker (pid {})", old.pid);
            old.request_stop();
            let mut exited = old.exited.clone();
            let bound = self.config.stop_grace + Duration::from_secs(5);
            if tokio::time::timeout(bound, exited.wait_for(|e| *e))
                .await
                .is_err()
            {
                warn!("Timed out waiting for worker {} to exit", old.pid);
            }
        }
    }

    pub async fn status(&self) -> WorkerStatus {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(h) if h.running.load(Ordering::SeqCst) => WorkerStatus {
                ready: h.ready.load(Ordering::SeqCst),
                running: true,
                pid: Some(h.pid),
            },
            _ => WorkerStatus {
                ready: false,
                running: false,
                pid: None,
            },
        }
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit.lock().ok().and_then(|g| *g)
    }

    /// Guarded accessor for the invoker: the current handle, only while it is
    /// both running and ready.
    pub(crate) async fn ready_handle(&self) -> Option<Arc<WorkerHandle>> {
        let active = self.active.read().await;
        active.as_ref().filter(|h| h.is_ready()).cloned()
    }
}

/// Graceful termination: SIGTERM, bounded wait, SIGKILL fallback. Always
/// returns an observed exit status so the caller never leaves a zombie.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("kill")
            .arg("-15")
            .arg(pid.to_string())
            .output();
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Worker ignored SIGTERM, force-killing");
            let _ = child.kill().await;
            child.wait().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    struct NoCredentials;

    #[async_trait::async_trait]
    impl CredentialProvider for NoCredentials {
        async fn tokens_for(
            &self,
            _user_id: &str,
        ) -> Result<Option<crate::core::store::types::GoogleTokens>> {
            Ok(None)
        }
    }

    fn supervisor(script: &str) -> Arc<WorkerSupervisor> {
        let mut config = WorkerConfig::new("sh", vec!["-c".to_string(), script.to_string()]);
        config.stop_grace = Duration::from_millis(500);
        Arc::new(WorkerSupervisor::new(config, Arc::new(NoCredentials)))
    }

    async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    async fn wait_until_ready(sup: &Arc<WorkerSupervisor>) {
        let sup = sup.clone();
        let became_ready = wait_for(
            move || {
                let sup = sup.clone();
                Box::pin(async move { sup.status().await.ready })
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(became_ready, "worker never became ready");
    }

    const ECHO_WORKER: &str = r#"echo 'MCP server ready'
while IFS= read -r line; do echo '{"id":1,"ok":true,"result":{"files":["q1.pdf"]}}'; done"#;

    const ERROR_WORKER: &str = r#"echo 'MCP server ready'
while IFS= read -r line; do echo '{"id":1,"ok":false,"error":"drive unavailable"}'; done"#;

    const SILENT_WORKER: &str = "echo 'MCP server ready'\nsleep 60";

    #[tokio::test]
    async fn start_flips_ready_on_sentinel() {
        let sup = supervisor(SILENT_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;
        let status = sup.status().await;
        assert!(status.running);
        assert!(status.pid.is_some());
        sup.stop().await;
    }

    #[tokio::test]
    async fn garbled_output_never_flips_ready() {
        let sup = supervisor("echo 'almost ready...'\necho '{not json'\nsleep 60");
        sup.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = sup.status().await;
        assert!(status.running);
        assert!(!status.ready);
        sup.stop().await;
    }

    #[tokio::test]
    async fn invoke_roundtrip() {
        let sup = supervisor(ECHO_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;

        let invoker = ToolInvoker::new(sup.clone());
        let result = invoker
            .execute(
                "drive_search_files",
                &json!({"query": "Q1"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result["files"][0], "q1.pdf");
        sup.stop().await;
    }

    #[tokio::test]
    async fn worker_error_becomes_invocation_failure() {
        let sup = supervisor(ERROR_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;

        let invoker = ToolInvoker::new(sup.clone());
        let err = invoker
            .execute("drive_search_files", &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ToolCallError::Invocation(msg) => assert_eq!(msg, "drive unavailable"),
            other => panic!("expected invocation error, got {other:?}"),
        }
        sup.stop().await;
    }

    #[tokio::test]
    async fn not_ready_fails_immediately() {
        let sup = supervisor("sleep 60");
        sup.start(None).await.unwrap();

        let invoker = ToolInvoker::new(sup.clone());
        let started = Instant::now();
        let err = invoker
            .execute("drive_search_files", &json!({}), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolCallError::WorkerNotReady));
        assert!(started.elapsed() < Duration::from_secs(1));
        sup.stop().await;
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let sup = supervisor(SILENT_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;

        let invoker = ToolInvoker::new(sup.clone());
        let err = invoker
            .execute(
                "drive_search_files",
                &json!({}),
                Duration::from_millis(300),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolCallError::Timeout(_)));
        sup.stop().await;
    }

    #[tokio::test]
    async fn crash_clears_readiness_and_records_exit_code() {
        let sup = supervisor("echo 'MCP server ready'\nexit 3");
        sup.start(None).await.unwrap();

        let sup_poll = sup.clone();
        let exited = wait_for(
            move || {
                let sup = sup_poll.clone();
                Box::pin(async move { !sup.status().await.running })
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(exited, "worker exit never observed");

        let status = sup.status().await;
        assert!(!status.ready);
        assert!(status.pid.is_none());
        assert_eq!(sup.last_exit_code(), Some(3));
    }

    #[tokio::test]
    async fn credentials_are_injected_into_worker_env() {
        struct StaticCredentials;

        #[async_trait::async_trait]
        impl CredentialProvider for StaticCredentials {
            async fn tokens_for(
                &self,
                _user_id: &str,
            ) -> Result<Option<crate::core::store::types::GoogleTokens>> {
                Ok(Some(crate::core::store::types::GoogleTokens {
                    access_token: "at-123".to_string(),
                    refresh_token: None,
                    id_token: None,
                    expires_at: None,
                }))
            }
        }

        // Only announces readiness when the access token made it into env.
        let script =
            "if [ \"$GOOGLE_ACCESS_TOKEN\" = \"at-123\" ]; then echo 'MCP server ready'; fi\nsleep 60";
        let mut config = WorkerConfig::new("sh", vec!["-c".to_string(), script.to_string()]);
        config.stop_grace = Duration::from_millis(500);
        let sup = Arc::new(WorkerSupervisor::new(config, Arc::new(StaticCredentials)));

        sup.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!sup.status().await.ready, "no user id, no tokens, no sentinel");

        sup.restart(Some("user-1")).await.unwrap();
        wait_until_ready(&sup).await;
        sup.stop().await;
    }

    #[tokio::test]
    async fn spawn_failure_reports_and_leaves_not_running() {
        let config = WorkerConfig::new("/nonexistent/deskflow-worker", vec![]);
        let sup = WorkerSupervisor::new(config, Arc::new(NoCredentials));
        assert!(sup.start(None).await.is_err());
        let status = sup.status().await;
        assert!(!status.running);
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn concurrent_restarts_settle_on_one_worker() {
        let sup = supervisor(SILENT_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;
        let first_pid = sup.status().await.pid.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let sup = sup.clone();
            tasks.push(tokio::spawn(async move { sup.restart(None).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let status = sup.status().await;
        assert!(status.running);
        let final_pid = status.pid.unwrap();
        assert_ne!(final_pid, first_pid);

        // Every predecessor, including the first, must be gone.
        let alive = std::process::Command::new("kill")
            .arg("-0")
            .arg(first_pid.to_string())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        assert!(!alive, "original worker survived the restarts");
        sup.stop().await;
    }

    #[tokio::test]
    async fn restart_fails_inflight_invocation_quickly() {
        let sup = supervisor(SILENT_WORKER);
        sup.start(None).await.unwrap();
        wait_until_ready(&sup).await;

        let invoker = ToolInvoker::new(sup.clone());
        let inflight = tokio::spawn(async move {
            invoker
                .execute("drive_search_files", &json!({}), Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        sup.restart(None).await.unwrap();

        let result = inflight.await.unwrap();
        assert!(result.is_err(), "in-flight call must not survive a restart");
        assert!(started.elapsed() < Duration::from_secs(10));
        sup.stop().await;
    }
}

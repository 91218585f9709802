// Statement execution against the target backend
use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DdlStatement, ExecutionOutcome, ExecutionResult, PipelineConfig};
use crate::services::data_lake::{DataLakeClient, HttpDataLakeClient, LocalDataLakeClient};

/// Backend error fragments meaning the object is already there
const ALREADY_EXISTS_MARKERS: [&str; 3] = [
    "already exists",
    "there is already an object named",
    "there are already statistics",
];

/// Sends one statement to the backend
#[async_trait::async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &DdlStatement) -> Result<(), AppError>;

    /// Executors that only log statements report them as not executed
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Release backend resources held for the invocation
    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Execute statements in order. A failing statement does not stop the batch;
/// cancellation does.
pub async fn execute_statements(
    executor: &dyn StatementExecutor,
    statements: &[DdlStatement],
    cancel: &CancellationToken,
) -> Vec<ExecutionResult> {
    let mut results = Vec::with_capacity(statements.len());

    for statement in statements {
        if cancel.is_cancelled() {
            tracing::info!(
                "Execution cancelled, {} statement(s) not sent",
                statements.len() - results.len()
            );
            break;
        }

        let start = Instant::now();
        let outcome = match executor.execute(statement).await {
            Ok(()) if executor.is_dry_run() => ExecutionOutcome::NotExecuted {
                reason: "dry run".to_string(),
            },
            Ok(()) => ExecutionOutcome::Succeeded,
            Err(e) if is_already_exists(&e) => {
                tracing::info!("{:?} for {} already exists, skipping", statement.kind, statement.table_name);
                ExecutionOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!("{:?} for {} failed: {}", statement.kind, statement.table_name, e);
                ExecutionOutcome::Failed { error: e.to_string() }
            }
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        results.push(ExecutionResult::new(statement, outcome, execution_time_ms));
    }

    results
}

fn is_already_exists(error: &AppError) -> bool {
    let message = error.to_string().to_lowercase();
    ALREADY_EXISTS_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Logs statements without sending them anywhere
pub struct DryRunExecutor;

#[async_trait::async_trait]
impl StatementExecutor for DryRunExecutor {
    async fn execute(&self, statement: &DdlStatement) -> Result<(), AppError> {
        tracing::info!(
            "[dry run] {} {}:\n{}",
            statement.dialect.as_str(),
            statement.table_name,
            statement.text
        );
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct LivySessionRequest<'a> {
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct LivyStatementRequest<'a> {
    code: &'a str,
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct LivySession {
    id: u64,
    state: String,
}

#[derive(Debug, Deserialize)]
struct LivyStatement {
    id: u64,
    state: String,
    #[serde(default)]
    output: Option<LivyOutput>,
}

#[derive(Debug, Deserialize)]
struct LivyOutput {
    status: String,
    #[serde(default)]
    evalue: Option<String>,
}

/// Runs Spark SQL through a Livy-compatible REST endpoint.
///
/// One interactive session is opened lazily, reused for every statement of
/// the invocation and deleted by `close`.
pub struct LivyExecutor {
    base_url: String,
    client: Client,
    session: OnceCell<u64>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl LivyExecutor {
    pub fn new(endpoint: &str, client: Client) -> Result<Self, AppError> {
        let url = Url::parse(endpoint.trim())
            .map_err(|e| AppError::Configuration(format!("Invalid TargetSparkConnection URL: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AppError::Configuration(
                "TargetSparkConnection must use http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            client,
            session: OnceCell::new(),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(600),
        })
    }

    async fn session_id(&self) -> Result<u64, AppError> {
        self.session
            .get_or_try_init(|| async {
                let session: LivySession = self
                    .post_json(
                        &format!("{}/sessions", self.base_url),
                        &LivySessionRequest { kind: "sql" },
                    )
                    .await?;
                tracing::info!("Opened Livy session {}", session.id);

                let url = format!("{}/sessions/{}", self.base_url, session.id);
                let mut state = session.state;
                let deadline = Instant::now() + self.poll_timeout;
                while state != "idle" {
                    if matches!(state.as_str(), "error" | "dead" | "killed" | "shutting_down") {
                        return Err(AppError::Execution(format!(
                            "Livy session {} ended in state {}",
                            session.id, state
                        )));
                    }
                    if Instant::now() >= deadline {
                        return Err(AppError::Execution(format!(
                            "Livy session {} not ready after {:?}",
                            session.id, self.poll_timeout
                        )));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                    state = self.get_json::<LivySession>(&url).await?.state;
                }
                Ok(session.id)
            })
            .await
            .copied()
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("Livy request failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("Livy request failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn delete(&self, url: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("Livy request failed: {}", e)))?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(AppError::Execution(format!("Livy returned {} on {}", response.status(), url)))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Execution(format!("Livy returned {}: {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Execution(format!("Failed to parse Livy response: {}", e)))
    }
}

#[async_trait::async_trait]
impl StatementExecutor for LivyExecutor {
    async fn execute(&self, statement: &DdlStatement) -> Result<(), AppError> {
        let session_id = self.session_id().await?;

        let submitted: LivyStatement = self
            .post_json(
                &format!("{}/sessions/{}/statements", self.base_url, session_id),
                &LivyStatementRequest {
                    code: &statement.text,
                    kind: "sql",
                },
            )
            .await?;

        let url = format!(
            "{}/sessions/{}/statements/{}",
            self.base_url, session_id, submitted.id
        );
        let deadline = Instant::now() + self.poll_timeout;
        let mut current = submitted;
        loop {
            match current.state.as_str() {
                "available" => break,
                "error" | "cancelled" | "cancelling" => {
                    return Err(AppError::Execution(format!(
                        "Livy statement {} ended in state {}",
                        current.id, current.state
                    )))
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(AppError::Execution(format!(
                    "Livy statement {} still running after {:?}",
                    current.id, self.poll_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            current = self.get_json(&url).await?;
        }

        match current.output {
            Some(output) if output.status == "ok" => Ok(()),
            Some(output) => Err(AppError::Execution(
                output.evalue.unwrap_or_else(|| format!("statement status {}", output.status)),
            )),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), AppError> {
        let Some(session_id) = self.session.get() else {
            return Ok(());
        };
        self.delete(&format!("{}/sessions/{}", self.base_url, session_id)).await?;
        tracing::info!("Closed Livy session {}", session_id);
        Ok(())
    }
}

/// Creates the per-invocation collaborators from a resolved config
pub trait BackendFactory: Send + Sync {
    fn data_lake(&self, config: &PipelineConfig) -> Box<dyn DataLakeClient>;

    fn executor(&self, config: &PipelineConfig) -> Result<Box<dyn StatementExecutor>, AppError>;
}

/// HTTP data lake (or a local folder) plus Livy for Spark targets
pub struct DefaultBackendFactory {
    http_client: Client,
    local_root: Option<PathBuf>,
}

impl DefaultBackendFactory {
    pub fn new(http_client: Client, local_root: Option<PathBuf>) -> Self {
        Self {
            http_client,
            local_root,
        }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn data_lake(&self, config: &PipelineConfig) -> Box<dyn DataLakeClient> {
        match &self.local_root {
            Some(root) => Box::new(LocalDataLakeClient::new(root.clone())),
            None => Box::new(HttpDataLakeClient::new(
                self.http_client.clone(),
                config.access_key.clone(),
            )),
        }
    }

    fn executor(&self, config: &PipelineConfig) -> Result<Box<dyn StatementExecutor>, AppError> {
        config.require_target()?;

        match config.target_spark_endpoint.as_deref().filter(|_| config.targets_spark()) {
            Some(endpoint) => Ok(Box::new(LivyExecutor::new(endpoint, self.http_client.clone())?)),
            None => {
                tracing::warn!("No SQL driver is linked for the Synapse endpoint; statements are logged only");
                Ok(Box::new(DryRunExecutor))
            }
        }
    }
}

// Trigger dispatch
//
// Every trigger kind funnels into one linear pipeline:
// config -> metadata -> [landing zone] -> statements -> execution.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::models::{
    DdlStatement, ExecutionResult, PipelineConfig, PipelineWarning, QueueMessage, StorageEvent, TableMetadata,
};
use crate::services::auxiliary::AuxiliaryData;
use crate::services::config_resolver::{ConfigResolver, RequestOverrides, SettingsSource};
use crate::services::ddl::{generate, select_generator};
use crate::services::executor::{execute_statements, BackendFactory};
use crate::services::landing_zone::{LandingZoneWaiter, WaitOutcome, WaitPolicy};
use crate::services::manifest_reader::ManifestReader;
use crate::validation::UrlValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ConfigResolved,
    MetadataExtracted,
    LandingZoneChecked,
    StatementsGenerated,
    Executed,
}

/// How far a direct request runs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Metadata,
    Ddl,
    Execute,
}

/// Everything one invocation produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub invocation_id: Uuid,
    pub manifest_url: String,
    pub stages: Vec<PipelineStage>,
    pub metadata: Vec<TableMetadata>,
    pub statements: Vec<DdlStatement>,
    pub results: Vec<ExecutionResult>,
    pub warnings: Vec<PipelineWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_zone: Option<WaitOutcome>,
}

impl PipelineReport {
    fn new(invocation_id: Uuid, manifest_url: &str) -> Self {
        Self {
            invocation_id,
            manifest_url: manifest_url.to_string(),
            stages: vec![PipelineStage::ConfigResolved],
            metadata: Vec::new(),
            statements: Vec::new(),
            results: Vec::new(),
            warnings: Vec::new(),
            landing_zone: None,
        }
    }
}

/// Result of a fire-and-forget trigger
#[derive(Debug)]
pub enum TriggerOutcome {
    Ignored { reason: String },
    Completed(PipelineReport),
    Failed(AppError),
}

pub struct TriggerDispatcher {
    settings: Arc<dyn SettingsSource>,
    auxiliary: Arc<AuxiliaryData>,
    factory: Arc<dyn BackendFactory>,
    wait_policy: WaitPolicy,
}

impl TriggerDispatcher {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        auxiliary: Arc<AuxiliaryData>,
        factory: Arc<dyn BackendFactory>,
        wait_policy: WaitPolicy,
    ) -> Self {
        Self {
            settings,
            auxiliary,
            factory,
            wait_policy,
        }
    }

    /// Direct request: parameters come from the request, no landing zone wait
    pub async fn run_direct(
        &self,
        overrides: &RequestOverrides,
        mode: PipelineMode,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let config = ConfigResolver::new(self.settings.as_ref())
            .with_overrides(overrides)
            .pipeline_config(None)?;
        self.run(config, mode, false, cancel).await
    }

    /// Storage notification: only `.cdm.json` writes start a run
    pub async fn on_storage_event(&self, event: StorageEvent, cancel: &CancellationToken) -> TriggerOutcome {
        let url = match &event {
            StorageEvent::DataChanged { url, .. } => url.clone(),
            StorageEvent::SubscriptionValidation { .. } => {
                return TriggerOutcome::Ignored {
                    reason: "subscription validation is answered by the webhook".to_string(),
                }
            }
        };

        if !UrlValidator::is_data_change_event(&url) {
            tracing::debug!("Ignoring storage event for {}", url);
            return TriggerOutcome::Ignored {
                reason: format!("{} is not a manifest change", url),
            };
        }

        let config = match ConfigResolver::new(self.settings.as_ref()).pipeline_config(Some(&url)) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Configuration for {} failed: {}", url, e);
                return TriggerOutcome::Failed(e);
            }
        };

        match self.run(config, PipelineMode::Execute, true, cancel).await {
            Ok(report) => TriggerOutcome::Completed(report),
            Err(e) => {
                tracing::error!("Pipeline for {} failed: {}", url, e);
                TriggerOutcome::Failed(e)
            }
        }
    }

    /// Queue message: delivery metadata is logged, the body is a storage event
    pub async fn on_queue_message(&self, message: QueueMessage, cancel: &CancellationToken) -> TriggerOutcome {
        tracing::info!(
            "Queue message {} (delivery count {}, enqueued {})",
            message.message_id,
            message.delivery_count,
            message
                .enqueued_time_utc
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );

        match StorageEvent::try_from(message.body) {
            Ok(event) => self.on_storage_event(event, cancel).await,
            Err(e) => {
                tracing::warn!("Queue message {} has no usable event: {}", message.message_id, e);
                TriggerOutcome::Ignored {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn run(
        &self,
        config: PipelineConfig,
        mode: PipelineMode,
        wait_for_landing_zone: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let invocation_id = Uuid::new_v4();
        let mut report = PipelineReport::new(invocation_id, &config.manifest_url);
        tracing::info!(
            "Invocation {} started for {} ({:?})",
            invocation_id,
            config.manifest_url,
            mode
        );

        // Missing targets are configuration errors, raised before any extraction
        let executor = match mode {
            PipelineMode::Execute => Some(self.factory.executor(&config)?),
            _ => None,
        };
        let data_lake = self.factory.data_lake(&config);

        checkpoint(cancel)?;
        let extraction = ManifestReader::new(data_lake.as_ref(), &self.auxiliary)
            .extract(&config, cancel)
            .await?;
        report.metadata = extraction.tables;
        report.warnings.extend(extraction.warnings);
        report.stages.push(PipelineStage::MetadataExtracted);

        if mode == PipelineMode::Metadata {
            return Ok(report);
        }

        if wait_for_landing_zone && UrlValidator::requires_landing_zone_check(&config.manifest_url) {
            checkpoint(cancel)?;
            let outcome = LandingZoneWaiter::new(data_lake.as_ref(), self.wait_policy)
                .wait(&report.metadata, cancel)
                .await;
            match &outcome {
                WaitOutcome::Cancelled => {
                    return Err(AppError::Cancelled("landing zone wait aborted".to_string()))
                }
                WaitOutcome::TimedOut { missing } => {
                    report.warnings.push(PipelineWarning::landing_zone(format!(
                        "Timed out waiting for {} folder(s): {}",
                        missing.len(),
                        missing.join(", ")
                    )));
                }
                WaitOutcome::Satisfied => {}
            }
            report.landing_zone = Some(outcome);
            report.stages.push(PipelineStage::LandingZoneChecked);
        }

        checkpoint(cancel)?;
        let generator = select_generator(&config);
        let generation = generate(generator.as_ref(), &report.metadata, &config, &self.auxiliary);
        report.statements = generation.statements;
        report.warnings.extend(generation.warnings);
        report.stages.push(PipelineStage::StatementsGenerated);

        let Some(executor) = executor else {
            return Ok(report);
        };

        checkpoint(cancel)?;
        report.results = execute_statements(executor.as_ref(), &report.statements, cancel).await;
        if let Err(e) = executor.close().await {
            tracing::warn!("Invocation {}: releasing the executor failed: {}", invocation_id, e);
        }

        if executor.is_dry_run() {
            report.warnings.push(PipelineWarning::execution(
                "No driver is linked for the relational target; statements were logged, not executed",
            ));
        }

        // Statements already sent stay in the report
        if cancel.is_cancelled() {
            report.warnings.push(PipelineWarning::execution(format!(
                "Cancelled after {} of {} statement(s)",
                report.results.len(),
                report.statements.len()
            )));
            tracing::warn!(
                "Invocation {} cancelled during execution after {} statement(s)",
                invocation_id,
                report.results.len()
            );
            return Ok(report);
        }
        report.stages.push(PipelineStage::Executed);

        let failed = report.results.iter().filter(|r| r.is_failure()).count();
        tracing::info!(
            "Invocation {} finished: {} statement(s), {} failed, {} warning(s)",
            invocation_id,
            report.results.len(),
            failed,
            report.warnings.len()
        );

        Ok(report)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled("invocation cancelled".to_string()));
    }
    Ok(())
}

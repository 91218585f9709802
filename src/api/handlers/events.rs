use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{EventGridEvent, QueueMessage, StorageEvent};
use crate::services::TriggerOutcome;

/// Storage notifications. The subscription handshake is answered inline;
/// change events are acknowledged and processed on tracked background tasks
/// that shutdown waits for.
pub async fn storage_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<EventGridEvent>>,
) -> Result<Response, AppError> {
    let mut accepted = 0usize;

    for event in events {
        let event = match StorageEvent::try_from(event) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping storage event: {}", e);
                continue;
            }
        };

        if let StorageEvent::SubscriptionValidation { code } = &event {
            tracing::info!("Answering event subscription validation");
            return Ok(Json(json!({ "validationResponse": code })).into_response());
        }

        let dispatcher = state.dispatcher.clone();
        let cancel = state.shutdown.child_token();
        state.tasks.spawn(async move {
            let outcome = dispatcher.on_storage_event(event, &cancel).await;
            log_outcome("storage event", outcome);
        });
        accepted += 1;
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))).into_response())
}

/// Queue delivery. The pipeline runs before the reply so that a transient
/// failure answers 503 and the queue redelivers the message.
pub async fn queue_message(
    State(state): State<AppState>,
    Json(message): Json<QueueMessage>,
) -> (StatusCode, Json<serde_json::Value>) {
    let message_id = message.message_id.clone();
    let cancel = state.shutdown.child_token();

    match state.dispatcher.on_queue_message(message, &cancel).await {
        TriggerOutcome::Ignored { reason } => {
            tracing::debug!("Ignored queue message {}: {}", message_id, reason);
            (
                StatusCode::OK,
                Json(json!({ "message_id": message_id, "status": "ignored", "reason": reason })),
            )
        }
        TriggerOutcome::Completed(report) => {
            let body = json!({
                "message_id": message_id,
                "status": "completed",
                "invocation_id": report.invocation_id,
                "statements": report.statements.len(),
                "failed": report.results.iter().filter(|r| r.is_failure()).count(),
                "warnings": report.warnings.len(),
            });
            log_outcome("queue message", TriggerOutcome::Completed(report));
            (StatusCode::OK, Json(body))
        }
        // Redelivery cannot fix a configuration problem
        TriggerOutcome::Failed(e @ AppError::Configuration(_)) => {
            tracing::error!("Dropping queue message {} [{}]: {}", message_id, e.code(), e);
            (
                StatusCode::OK,
                Json(json!({ "message_id": message_id, "status": "dropped", "error": error_body(&e) })),
            )
        }
        TriggerOutcome::Failed(e) => {
            tracing::error!("Queue message {} failed [{}]: {}", message_id, e.code(), e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message_id": message_id, "status": "failed", "error": error_body(&e) })),
            )
        }
    }
}

fn error_body(error: &AppError) -> serde_json::Value {
    json!({ "code": error.code(), "message": error.to_string() })
}

fn log_outcome(source: &str, outcome: TriggerOutcome) {
    match outcome {
        TriggerOutcome::Ignored { reason } => tracing::debug!("Ignored {}: {}", source, reason),
        TriggerOutcome::Completed(report) => tracing::info!(
            "Completed {} for {}: {} table(s), {} statement(s), {} warning(s)",
            source,
            report.manifest_url,
            report.metadata.len(),
            report.results.len(),
            report.warnings.len()
        ),
        TriggerOutcome::Failed(e) => tracing::error!("Failed {} [{}]: {}", source, e.code(), e),
    }
}

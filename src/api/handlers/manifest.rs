use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::services::config_resolver::{tokens, RequestOverrides};
use crate::services::{PipelineMode, PipelineReport};

/// Full run: extract, generate and execute
pub async fn manifest_to_sql(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PipelineReport>, AppError> {
    run(state, &headers, &params, PipelineMode::Execute).await
}

/// Extract and generate, return the statements without executing them
pub async fn manifest_to_sql_ddl(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PipelineReport>, AppError> {
    run(state, &headers, &params, PipelineMode::Ddl).await
}

/// Extract table metadata only
pub async fn get_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PipelineReport>, AppError> {
    run(state, &headers, &params, PipelineMode::Metadata).await
}

async fn run(
    state: AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    mode: PipelineMode,
) -> Result<Json<PipelineReport>, AppError> {
    let overrides = request_overrides(headers, params);
    tracing::info!("Direct {:?} request", mode);

    let cancel = state.shutdown.child_token();
    let report = state.dispatcher.run_direct(&overrides, mode, &cancel).await?;
    Ok(Json(report))
}

/// Headers win over query parameters when both carry a token
fn request_overrides(headers: &HeaderMap, params: &HashMap<String, String>) -> RequestOverrides {
    let mut overrides = RequestOverrides::new();

    for token in tokens::ALL {
        if let Some(value) = headers.get(token).and_then(|v| v.to_str().ok()) {
            overrides.insert(token, value);
        }
    }

    for (key, value) in params {
        if tokens::ALL.iter().any(|token| token.eq_ignore_ascii_case(key)) {
            overrides.insert_if_absent(key, value.as_str());
        }
    }

    overrides
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::services::TriggerDispatcher;

pub mod events;
pub mod manifest;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<TriggerDispatcher>,
    /// Cancelled on shutdown; every invocation runs under a child token
    pub shutdown: CancellationToken,
    /// Background event runs, awaited on shutdown
    pub tasks: TaskTracker,
}

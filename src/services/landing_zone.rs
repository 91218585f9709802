// Landing zone wait: block until every table's data folder exists in the lake.

use std::collections::BTreeSet;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LandingZoneConfig;
use crate::models::TableMetadata;
use crate::services::data_lake::DataLakeClient;
use crate::validation::ENTITIES_PATH_MARKER;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    Satisfied,
    TimedOut { missing: Vec<String> },
    Cancelled,
}

/// Backoff parameters for the existence poll
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl From<&LandingZoneConfig> for WaitPolicy {
    fn from(config: &LandingZoneConfig) -> Self {
        Self {
            timeout: config.timeout(),
            initial_interval: config.initial_interval(),
            max_interval: config.max_interval(),
        }
    }
}

pub struct LandingZoneWaiter<'a> {
    client: &'a dyn DataLakeClient,
    policy: WaitPolicy,
}

impl<'a> LandingZoneWaiter<'a> {
    pub fn new(client: &'a dyn DataLakeClient, policy: WaitPolicy) -> Self {
        Self { client, policy }
    }

    /// Poll until every distinct data folder exists, the timeout elapses or
    /// `cancel` fires. Tables without a location, or stored under an
    /// `/Entities/` path, are not waited on.
    pub async fn wait(&self, tables: &[TableMetadata], cancel: &CancellationToken) -> WaitOutcome {
        let mut pending: BTreeSet<String> = tables
            .iter()
            .filter_map(|table| table.location.as_ref())
            .map(|location| location.folder_url.clone())
            .filter(|folder| !folder.contains(ENTITIES_PATH_MARKER))
            .collect();

        if pending.is_empty() {
            return WaitOutcome::Satisfied;
        }

        let deadline = Instant::now() + self.policy.timeout;
        let mut interval = self.policy.initial_interval;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            attempt += 1;
            // A round that never answers must not outlive the deadline or the token
            let probed = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Landing zone wait cancelled during probe round {}", attempt);
                    return WaitOutcome::Cancelled;
                }
                probed = tokio::time::timeout_at(deadline, self.probe(&pending)) => probed,
            };
            pending = match probed {
                Ok(still_missing) => still_missing,
                Err(_) => {
                    tracing::warn!(
                        "Landing zone probe round {} did not finish before the {:?} timeout",
                        attempt,
                        self.policy.timeout
                    );
                    return WaitOutcome::TimedOut {
                        missing: pending.into_iter().collect(),
                    };
                }
            };
            if pending.is_empty() {
                tracing::info!("Landing zone ready after {} probe round(s)", attempt);
                return WaitOutcome::Satisfied;
            }

            let now = Instant::now();
            if now >= deadline {
                let missing: Vec<String> = pending.into_iter().collect();
                tracing::warn!(
                    "Landing zone wait timed out after {:?}; {} folder(s) still missing",
                    self.policy.timeout,
                    missing.len()
                );
                return WaitOutcome::TimedOut { missing };
            }

            let sleep_for = interval.min(deadline - now);
            tracing::debug!(
                "{} folder(s) not yet present, next probe in {:?}",
                pending.len(),
                sleep_for
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Landing zone wait cancelled");
                    return WaitOutcome::Cancelled;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }

            interval = (interval * 2).min(self.policy.max_interval);
        }
    }

    /// Probe all pending folders concurrently, returning those still missing
    async fn probe(&self, pending: &BTreeSet<String>) -> BTreeSet<String> {
        let probes = pending.iter().map(|folder| async move {
            match self.client.exists(folder).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!("Probe of {} failed, treating as absent: {}", folder, e);
                    false
                }
            }
        });
        let found = join_all(probes).await;

        pending
            .iter()
            .zip(found)
            .filter_map(|(folder, found)| (!found).then(|| folder.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::AppError;
    use crate::models::{ColumnMetadata, DataLocation, FileFormat, SemanticType};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Folders appear after a number of `exists` calls
    struct DelayedLake {
        present: Mutex<HashSet<String>>,
        appear_after: usize,
        calls: AtomicUsize,
        failing: Option<String>,
    }

    impl DelayedLake {
        fn new(appear_after: usize) -> Self {
            Self {
                present: Mutex::new(HashSet::new()),
                appear_after,
                calls: AtomicUsize::new(0),
                failing: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl DataLakeClient for DelayedLake {
        async fn read_to_string(&self, url: &str) -> Result<String, AppError> {
            Err(AppError::NotFound(url.to_string()))
        }

        async fn exists(&self, url: &str) -> Result<bool, AppError> {
            if self.failing.as_deref() == Some(url) {
                return Err(AppError::DataLake("throttled".to_string()));
            }
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls > self.appear_after {
                self.present.lock().unwrap().insert(url.to_string());
            }
            Ok(self.present.lock().unwrap().contains(url))
        }
    }

    /// Every existence check hangs
    struct StalledLake;

    #[async_trait::async_trait]
    impl DataLakeClient for StalledLake {
        async fn read_to_string(&self, url: &str) -> Result<String, AppError> {
            Err(AppError::NotFound(url.to_string()))
        }

        async fn exists(&self, _url: &str) -> Result<bool, AppError> {
            futures::future::pending::<Result<bool, AppError>>().await
        }
    }

    fn table(name: &str, folder: Option<&str>) -> TableMetadata {
        TableMetadata {
            name: name.to_string(),
            schema: "dbo".to_string(),
            columns: vec![ColumnMetadata {
                name: "Id".to_string(),
                semantic_type: SemanticType::Int32,
                nullable: true,
                max_length: None,
            }],
            location: folder.map(|f| DataLocation {
                folder_url: f.to_string(),
                file_format: FileFormat::Csv,
            }),
            partition_pattern: None,
            linkage: None,
        }
    }

    fn policy(timeout_ms: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_satisfied_immediately() {
        let lake = DelayedLake::new(0);
        let waiter = LandingZoneWaiter::new(&lake, policy(1000));
        let tables = vec![table("Orders", Some("https://a/lake/Orders"))];
        assert_eq!(waiter.wait(&tables, &CancellationToken::new()).await, WaitOutcome::Satisfied);
    }

    #[tokio::test]
    async fn test_satisfied_after_backoff() {
        let lake = DelayedLake::new(3);
        let waiter = LandingZoneWaiter::new(&lake, policy(2000));
        let tables = vec![table("Orders", Some("https://a/lake/Orders"))];
        assert_eq!(waiter.wait(&tables, &CancellationToken::new()).await, WaitOutcome::Satisfied);
        assert!(lake.calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_times_out_with_missing_folders() {
        let mut lake = DelayedLake::new(0);
        lake.failing = Some("https://a/lake/Customers".to_string());
        let waiter = LandingZoneWaiter::new(&lake, policy(50));
        let tables = vec![
            table("Orders", Some("https://a/lake/Orders")),
            table("Customers", Some("https://a/lake/Customers")),
        ];

        let outcome = waiter.wait(&tables, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                missing: vec!["https://a/lake/Customers".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_entities_paths_and_missing_locations_are_skipped() {
        let lake = DelayedLake::new(usize::MAX);
        let waiter = LandingZoneWaiter::new(&lake, policy(1000));
        let tables = vec![
            table("Orders", Some("https://a/lake/Entities/Orders")),
            table("View", None),
        ];
        assert_eq!(waiter.wait(&tables, &CancellationToken::new()).await, WaitOutcome::Satisfied);
        assert_eq!(lake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let lake = DelayedLake::new(usize::MAX);
        let waiter = LandingZoneWaiter::new(&lake, policy(60_000));
        let tables = vec![table("Orders", Some("https://a/lake/Orders"))];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter.wait(&tables, &cancel))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_stalled_existence_check_still_times_out() {
        let waiter = LandingZoneWaiter::new(&StalledLake, policy(50));
        let tables = vec![table("Orders", Some("https://a/lake/Orders"))];

        let outcome = tokio::time::timeout(Duration::from_secs(2), waiter.wait(&tables, &CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                missing: vec!["https://a/lake/Orders".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_stalled_existence_check_yields_to_cancellation() {
        let waiter = LandingZoneWaiter::new(&StalledLake, policy(60_000));
        let tables = vec![table("Orders", Some("https://a/lake/Orders"))];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(2), waiter.wait(&tables, &cancel))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}

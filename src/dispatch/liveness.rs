//! Liveness sweep
//!
//! Periodically marks workers offline when their last heartbeat is older than the
//! heartbeat timeout. The sweep only moves workers toward offline; a later heartbeat
//! brings them back. Staleness is re-checked by the registry at write time, so a
//! heartbeat landing between the listing and the write keeps the worker online.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::WorkerStatus;
use crate::registry::WorkerRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub enabled: bool,

    /// Time between sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Heartbeat age after which a worker is marked offline
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

pub struct LivenessSweep {
    registry: Arc<dyn WorkerRegistry>,
    config: LivenessConfig,
}

impl LivenessSweep {
    pub fn new(registry: Arc<dyn WorkerRegistry>, config: LivenessConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Mark every non-offline worker whose heartbeat is older than the timeout at `now`
    ///
    /// Returns the ids marked offline. A failure on one worker does not stop the sweep.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> GatewayResult<Vec<String>> {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .map_err(|e| GatewayError::config(format!("Invalid heartbeat timeout: {}", e)))?;
        let cutoff = now - timeout;

        let stale: Vec<_> = self
            .registry
            .list_all()
            .await?
            .into_iter()
            .filter(|worker| worker.status != WorkerStatus::Offline)
            .filter(|worker| worker.last_heartbeat < cutoff)
            .collect();

        let mut marked = Vec::with_capacity(stale.len());
        for worker in stale {
            match self.registry.mark_offline_if_stale(&worker.id, cutoff).await {
                Ok(true) => {
                    warn!(
                        worker_id = %worker.id,
                        service_type = %worker.service_type,
                        last_heartbeat = %worker.last_heartbeat,
                        "Heartbeat timed out, worker marked offline"
                    );
                    counter!("liveness_workers_marked_offline_total").increment(1);
                    marked.push(worker.id);
                }
                Ok(false) => {
                    debug!(worker_id = %worker.id, "Heartbeat arrived during sweep, worker kept");
                }
                // Removed between listing and marking
                Err(GatewayError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(worker_id = %worker.id, error = %e, "Failed to mark worker offline");
                }
            }
        }

        Ok(marked)
    }

    pub async fn sweep_once(&self) -> GatewayResult<Vec<String>> {
        self.sweep_at(Utc::now()).await
    }

    /// Run the sweep on its own timer until `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = self.config.interval.as_millis() as u64,
                heartbeat_timeout_ms = self.config.heartbeat_timeout.as_millis() as u64,
                "Liveness sweep started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(marked) if !marked.is_empty() => {
                                info!(count = marked.len(), "Liveness sweep marked workers offline");
                            }
                            Ok(_) => debug!("Liveness sweep found no stale workers"),
                            Err(e) => warn!(error = %e, "Liveness sweep failed"),
                        }
                    }
                }
            }

            info!("Liveness sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HeartbeatRequest, NewWorker, ServiceType};
    use crate::registry::InMemoryWorkerRegistry;

    async fn setup() -> (Arc<InMemoryWorkerRegistry>, LivenessSweep, String) {
        let registry = Arc::new(InMemoryWorkerRegistry::new());
        let id = registry
            .register(NewWorker::new("w", "127.0.0.1", 9000, ServiceType::Render, 1))
            .await
            .unwrap()
            .id;
        let sweep = LivenessSweep::new(registry.clone(), LivenessConfig::default());
        (registry, sweep, id)
    }

    #[tokio::test]
    async fn test_fresh_worker_is_left_alone() {
        let (registry, sweep, id) = setup().await;
        let marked = sweep.sweep_at(Utc::now() + chrono::Duration::seconds(30)).await.unwrap();

        assert!(marked.is_empty());
        assert_eq!(registry.get(&id).await.unwrap().status, WorkerStatus::Online);
    }

    #[tokio::test]
    async fn test_stale_worker_is_marked_offline_once() {
        let (registry, sweep, id) = setup().await;
        let later = Utc::now() + chrono::Duration::seconds(61);

        assert_eq!(sweep.sweep_at(later).await.unwrap(), vec![id.clone()]);
        assert_eq!(registry.get(&id).await.unwrap().status, WorkerStatus::Offline);
        assert!(sweep.sweep_at(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_worker_is_also_swept() {
        let (registry, sweep, id) = setup().await;
        let mut heartbeat = HeartbeatRequest::new(&id);
        heartbeat.status = Some(WorkerStatus::Busy);
        registry.heartbeat(heartbeat).await.unwrap();

        let marked = sweep.sweep_at(Utc::now() + chrono::Duration::seconds(120)).await.unwrap();
        assert_eq!(marked, vec![id]);
    }

    #[tokio::test]
    async fn test_spawned_sweep_stops_on_cancel() {
        let registry = Arc::new(InMemoryWorkerRegistry::new());
        let id = registry
            .register(NewWorker::new("w", "127.0.0.1", 9000, ServiceType::Parse, 1))
            .await
            .unwrap()
            .id;
        let sweep = Arc::new(LivenessSweep::new(
            registry.clone(),
            LivenessConfig {
                enabled: true,
                interval: Duration::from_millis(20),
                heartbeat_timeout: Duration::from_millis(10),
            },
        ));

        let shutdown = CancellationToken::new();
        let handle = sweep.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.get(&id).await.unwrap().status, WorkerStatus::Offline);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use llamadeck_client::ModelTransport;
use llamadeck_core::{
    ModelRecord, ModelsSnapshot, PollConfig, Result, RunningModelRecord, UnifiedModel,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Cheap handle for asking the aggregator to refresh out of band, used by the
/// download supervisor when a pull completes and by mutation endpoints.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<()>) -> Self {
        Self { tx }
    }

    pub fn request(&self) {
        let _ = self.tx.send(());
    }
}

/// Merges the daemon's installed and running model lists into one consistent
/// view. Each refresh fetches both lists concurrently and publishes the joined
/// snapshot atomically; a failed fetch leaves the last good snapshot in place.
pub struct ModelStateAggregator {
    transport: Arc<dyn ModelTransport>,
    snapshot_tx: watch::Sender<ModelsSnapshot>,
    snapshot_rx: watch::Receiver<ModelsSnapshot>,
    refresh_tx: mpsc::UnboundedSender<()>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    interval: Duration,
}

impl ModelStateAggregator {
    pub fn new(transport: Arc<dyn ModelTransport>, config: &PollConfig) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(ModelsSnapshot::default());
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            snapshot_tx,
            snapshot_rx,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle::new(self.refresh_tx.clone())
    }

    /// Observers receive every published snapshot; the receiver always holds
    /// the most recent one.
    pub fn subscribe(&self) -> watch::Receiver<ModelsSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn current(&self) -> ModelsSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Fetch both source lists concurrently, join them, and publish the
    /// result. Fails without publishing anything when either fetch fails, so
    /// observers never see a half-updated view.
    pub async fn refresh(&self) -> Result<ModelsSnapshot> {
        let (installed, running) = tokio::try_join!(
            self.transport.list_installed(),
            self.transport.list_running()
        )?;

        let snapshot = ModelsSnapshot {
            models: join_models(installed, &running, Utc::now()),
            refreshed_at: Some(Utc::now()),
        };
        debug!(
            "Publishing model snapshot: {} installed, {} running",
            snapshot.models.len(),
            running.len()
        );
        self.snapshot_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Keep the snapshot fresh until shutdown: refresh on a fixed cadence and
    /// whenever a [`RefreshHandle`] asks for it.
    pub async fn run(&self) {
        let receiver = self.refresh_rx.lock().unwrap().take();
        let Some(mut refresh_rx) = receiver else {
            warn!("Aggregator poll loop is already running");
            return;
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                request = refresh_rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            if let Err(e) = self.refresh().await {
                warn!("Model refresh failed, keeping last snapshot: {}", e);
            }
        }
    }
}

/// Join installed models against the running set by exact name. A model with
/// no running record is not loaded; there is no third state.
fn join_models(
    installed: Vec<ModelRecord>,
    running: &[RunningModelRecord],
    now: DateTime<Utc>,
) -> Vec<UnifiedModel> {
    let running_by_name: HashMap<&str, &RunningModelRecord> =
        running.iter().map(|r| (r.model.as_str(), r)).collect();

    installed
        .into_iter()
        .map(|record| {
            let active = running_by_name.get(record.name.as_str()).copied();
            UnifiedModel {
                loaded: active.is_some(),
                ram_gb: active.map(|r| gib(r.size)),
                vram_gb: active.map(|r| gib(r.size_vram)),
                expires_in_seconds: active.and_then(|r| r.expires_at).and_then(|at| {
                    let secs = (at - now).num_seconds();
                    (secs > 0).then_some(secs)
                }),
                name: record.name,
                size_bytes: record.size,
                digest: record.digest,
                modified_at: record.modified_at,
                details: record.details,
            }
        })
        .collect()
}

fn gib(bytes: u64) -> f64 {
    let gb = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (gb * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{installed_model, running_model, FakeTransport};

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn join_reports_loaded_model_metrics() {
        let installed = vec![installed_model("llama3.2", 10 * GIB)];
        let running = vec![running_model(
            "llama3.2",
            5 * GIB,
            4 * GIB,
            Some(chrono::Duration::minutes(5)),
        )];

        let view = join_models(installed, &running, Utc::now());
        assert_eq!(view.len(), 1);
        assert!(view[0].loaded);
        assert_eq!(view[0].ram_gb, Some(5.0));
        assert_eq!(view[0].vram_gb, Some(4.0));
        let secs = view[0].expires_in_seconds.unwrap();
        assert!((295..=300).contains(&secs), "expires in {} secs", secs);
    }

    #[test]
    fn join_leaves_unloaded_models_bare() {
        let installed = vec![installed_model("llama3.2", 10 * GIB)];

        let view = join_models(installed, &[], Utc::now());
        assert!(!view[0].loaded);
        assert!(view[0].ram_gb.is_none());
        assert!(view[0].vram_gb.is_none());
        assert!(view[0].expires_in_seconds.is_none());
    }

    #[test]
    fn expired_or_absent_expiry_is_undefined() {
        let installed = vec![
            installed_model("past", GIB),
            installed_model("never", GIB),
        ];
        let running = vec![
            running_model("past", GIB, GIB, Some(chrono::Duration::minutes(-5))),
            running_model("never", GIB, GIB, None),
        ];

        let view = join_models(installed, &running, Utc::now());
        assert!(view.iter().all(|m| m.expires_in_seconds.is_none()));
        assert!(view.iter().all(|m| m.loaded));
    }

    #[tokio::test]
    async fn refresh_publishes_a_joined_snapshot() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_installed(vec![installed_model("qwen2.5:7b", 4 * GIB)]);
        transport.set_running(vec![running_model("qwen2.5:7b", 4 * GIB, 4 * GIB, None)]);

        let aggregator = ModelStateAggregator::new(transport, &PollConfig::default());
        let snapshot = aggregator.refresh().await.unwrap();

        assert_eq!(snapshot.models.len(), 1);
        assert!(snapshot.models[0].loaded);
        assert_eq!(aggregator.current().models.len(), 1);
        assert!(aggregator.current().refreshed_at.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_retains_last_good_snapshot() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_installed(vec![installed_model("llama3.2", 2 * GIB)]);

        let aggregator = ModelStateAggregator::new(transport.clone(), &PollConfig::default());
        aggregator.refresh().await.unwrap();
        let before = aggregator.current();

        transport.fail_running(true);
        assert!(aggregator.refresh().await.is_err());

        let after = aggregator.current();
        assert_eq!(after.models.len(), before.models.len());
        assert_eq!(after.refreshed_at, before.refreshed_at);

        // same policy when the installed-list fetch is the one that fails
        transport.fail_running(false);
        transport.fail_installed(true);
        assert!(aggregator.refresh().await.is_err());
        assert_eq!(aggregator.current().refreshed_at, before.refreshed_at);
    }
}

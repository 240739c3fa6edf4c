use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use llamadeck_client::{ModelTransport, ProgressDecoder};
use llamadeck_core::{DownloadConfig, DownloadSnapshot, DownloadStatus, ProgressEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::RefreshHandle;

/// State of one tracked pull. Mutated only by its own supervising task; every
/// other party reads cloned snapshots.
struct TaskHandle {
    seq: u64,
    cancel: CancellationToken,
    state: RwLock<DownloadSnapshot>,
}

impl TaskHandle {
    fn snapshot(&self) -> DownloadSnapshot {
        self.state.read().unwrap().clone()
    }

    fn update<F: FnOnce(&mut DownloadSnapshot)>(&self, f: F) {
        f(&mut self.state.write().unwrap());
    }
}

/// Process-wide registry of pull tasks. Each `start` spawns an independent
/// supervising task owning one streamed daemon connection; the collection
/// itself is the only shared mutable structure.
pub struct DownloadManager {
    transport: Arc<dyn ModelTransport>,
    tasks: DashMap<Uuid, Arc<TaskHandle>>,
    seq: AtomicU64,
    refresh: RefreshHandle,
    idle_timeout: Duration,
}

impl DownloadManager {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        refresh: RefreshHandle,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            transport,
            tasks: DashMap::new(),
            seq: AtomicU64::new(0),
            refresh,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    /// Create a brand-new task for `model` and begin pulling in the
    /// background. Never deduplicates: pulling the same name twice yields two
    /// independent tasks. Task ids are never reused.
    pub fn start(&self, model: &str) -> Uuid {
        let id = Uuid::new_v4();
        let handle = Arc::new(TaskHandle {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            state: RwLock::new(DownloadSnapshot {
                id,
                model: model.to_string(),
                status: DownloadStatus::Pending,
                status_text: "pending".to_string(),
                progress_percent: None,
                completed_bytes: None,
                total_bytes: None,
                error: None,
                started_at: Utc::now(),
                ended_at: None,
            }),
        });
        self.tasks.insert(id, handle.clone());

        info!("Starting pull of model: {}", model);
        tokio::spawn(supervise(
            self.transport.clone(),
            handle,
            self.refresh.clone(),
            self.idle_timeout,
        ));
        id
    }

    /// Request cancellation. No-op on unknown or already-terminal tasks, and
    /// safe to call concurrently with the task's own completion.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.tasks.get(&id) {
            Some(task) if task.snapshot().status.is_active() => {
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Remove a task from the observable set, cancelling it first if still
    /// active.
    pub fn remove(&self, id: Uuid) -> bool {
        match self.tasks.remove(&id) {
            Some((_, task)) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every task in a terminal state; active tasks are untouched.
    pub fn clear_terminal(&self) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| task.snapshot().status.is_active());
        before - self.tasks.len()
    }

    /// Snapshots of every tracked task, in creation order.
    pub fn list(&self) -> Vec<DownloadSnapshot> {
        let mut entries: Vec<(u64, DownloadSnapshot)> = self
            .tasks
            .iter()
            .map(|entry| (entry.value().seq, entry.value().snapshot()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    pub fn get(&self, id: Uuid) -> Option<DownloadSnapshot> {
        self.tasks.get(&id).map(|task| task.snapshot())
    }

    /// True iff at least one task for `model` is still pending or
    /// downloading. Feeds the duplicate-pull warning; `start` itself never
    /// refuses.
    pub fn is_active(&self, model: &str) -> bool {
        self.tasks.iter().any(|entry| {
            let snapshot = entry.value().snapshot();
            snapshot.model == model && snapshot.status.is_active()
        })
    }
}

/// Drive one pull to a terminal state. Owns the streamed connection for its
/// whole lifetime; dropping the stream on any exit path tears the connection
/// down so the daemon frees its transfer slot.
async fn supervise(
    transport: Arc<dyn ModelTransport>,
    task: Arc<TaskHandle>,
    refresh: RefreshHandle,
    idle_timeout: Duration,
) {
    let model = task.snapshot().model;

    let mut stream = tokio::select! {
        biased;
        _ = task.cancel.cancelled() => {
            finish(&task, DownloadStatus::Cancelled, None);
            return;
        }
        opened = transport.start_pull(&model) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Pull request for {} refused: {}", model, e);
                finish(&task, DownloadStatus::Failed, Some(e.to_string()));
                return;
            }
        }
    };

    let mut decoder = ProgressDecoder::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => {
                finish(&task, DownloadStatus::Cancelled, None);
                return;
            }
            read = tokio::time::timeout(idle_timeout, stream.next()) => match read {
                Ok(chunk) => chunk,
                Err(_) => {
                    finish(
                        &task,
                        DownloadStatus::Failed,
                        Some(format!("no data from daemon for {}s", idle_timeout.as_secs())),
                    );
                    return;
                }
            }
        };

        match chunk {
            Some(Ok(bytes)) => {
                for event in decoder.feed(&bytes) {
                    if apply_event(&task, &refresh, &model, event) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Pull stream for {} failed: {}", model, e);
                finish(&task, DownloadStatus::Failed, Some(e.to_string()));
                return;
            }
            None => {
                // Some daemons close the stream without a final marker after
                // emitting "success"; either signal suffices.
                if task.snapshot().status_text == "success" {
                    complete(&task, &refresh, &model);
                } else {
                    finish(
                        &task,
                        DownloadStatus::Failed,
                        Some("pull stream ended before completion".to_string()),
                    );
                }
                return;
            }
        }
    }
}

/// Fold one decoded event into the task state. Returns true once the task is
/// terminal and the stream should be abandoned.
fn apply_event(
    task: &TaskHandle,
    refresh: &RefreshHandle,
    model: &str,
    event: ProgressEvent,
) -> bool {
    if let Some(message) = event.error {
        warn!("Daemon reported pull error for {}: {}", model, message);
        finish(task, DownloadStatus::Failed, Some(message));
        return true;
    }

    if event.is_terminal_success() {
        complete(task, refresh, model);
        return true;
    }

    task.update(|state| {
        // the first event moves the task out of Pending
        state.status = DownloadStatus::Downloading;
        state.status_text = event.status;
        if let (Some(completed), Some(total)) = (event.completed, event.total) {
            state.completed_bytes = Some(completed);
            state.total_bytes = Some(total);
            let pct = percent(completed, total);
            // layers report independently and can regress the ratio; the
            // bar only ever moves forward
            state.progress_percent = Some(state.progress_percent.map_or(pct, |p| p.max(pct)));
        }
    });
    false
}

fn complete(task: &TaskHandle, refresh: &RefreshHandle, model: &str) {
    let mut entered_completed = false;
    task.update(|state| {
        if state.status.is_terminal() {
            return;
        }
        state.status = DownloadStatus::Completed;
        state.status_text = "success".to_string();
        state.progress_percent = Some(100);
        if let Some(total) = state.total_bytes {
            state.completed_bytes = Some(total);
        }
        state.ended_at = Some(Utc::now());
        entered_completed = true;
    });

    // exactly one refresh per completed pull
    if entered_completed {
        info!("Pull of {} complete", model);
        refresh.request();
    }
}

fn finish(task: &TaskHandle, status: DownloadStatus, error: Option<String>) {
    task.update(|state| {
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.error = error;
        state.ended_at = Some(Utc::now());
    });
}

fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (((completed as f64 / total as f64) * 100.0) as u8).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, FakeTransport};
    use tokio::sync::mpsc;

    fn manager_with(
        transport: Arc<FakeTransport>,
    ) -> (DownloadManager, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = DownloadManager::new(
            transport,
            RefreshHandle::new(tx),
            &DownloadConfig::default(),
        );
        (manager, rx)
    }

    #[test]
    fn percent_is_bounded() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(50, 100), 50);
        assert_eq!(percent(100, 100), 100);
        assert_eq!(percent(300, 100), 100);
    }

    #[tokio::test]
    async fn pull_completes_and_triggers_one_refresh() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("llama3.2");
        let (manager, mut refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        feed.line(r#"{"status":"pulling manifest"}"#);
        feed.line(r#"{"status":"downloading","digest":"sha256:ab","completed":50,"total":100}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.progress_percent == Some(50))
        })
        .await;

        feed.line(r#"{"status":"success"}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Completed)
        })
        .await;

        let snapshot = manager.get(id).unwrap();
        assert_eq!(snapshot.progress_percent, Some(100));
        assert_eq!(snapshot.completed_bytes, Some(100));
        assert_eq!(snapshot.status_text, "success");
        assert!(snapshot.ended_at.is_some());
        assert!(snapshot.error.is_none());

        assert!(refresh_rx.try_recv().is_ok());
        assert!(refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn progress_survives_chunk_boundaries_and_never_regresses() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("llama3.2");
        let (manager, _refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        feed.chunk(b"{\"status\":\"downl");
        feed.chunk(b"oading\",\"completed\":80,\"total\":100}\n");
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.progress_percent == Some(80))
        })
        .await;

        // a later layer reporting a smaller ratio must not move the bar back
        feed.line(r#"{"status":"downloading","completed":40,"total":100}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.completed_bytes == Some(40))
        })
        .await;
        assert_eq!(manager.get(id).unwrap().progress_percent, Some(80));
    }

    #[tokio::test]
    async fn daemon_error_line_fails_the_task() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("nosuch:latest");
        let (manager, mut refresh_rx) = manager_with(transport);

        let id = manager.start("nosuch:latest");
        feed.line(r#"{"error":"pull model manifest: file does not exist"}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Failed)
        })
        .await;

        let snapshot = manager.get(id).unwrap();
        assert_eq!(
            snapshot.error.as_deref(),
            Some("pull model manifest: file does not exist")
        );
        assert!(refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_initiating_request_fails_the_task() {
        let transport = Arc::new(FakeTransport::new());
        transport.queue_pull_failure("llama3.2", "daemon rejected the pull");
        let (manager, mut refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Failed)
        })
        .await;

        assert!(manager
            .get(id)
            .unwrap()
            .error
            .unwrap()
            .contains("daemon rejected the pull"));
        assert!(refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stream_end_without_success_marker_fails_the_task() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("llama3.2");
        let (manager, _refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        feed.line(r#"{"status":"downloading","completed":10,"total":100}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Downloading)
        })
        .await;

        drop(feed);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Failed)
        })
        .await;

        // progress freezes at the last known value
        assert_eq!(manager.get(id).unwrap().progress_percent, Some(10));
    }

    #[tokio::test]
    async fn cancellation_wins_over_buffered_events() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("llama3.2");
        let (manager, mut refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        feed.line(r#"{"status":"downloading","completed":25,"total":100}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Downloading)
        })
        .await;

        assert!(manager.cancel(id));
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Cancelled)
        })
        .await;

        // events still buffered in the stream must not resurrect the task
        feed.line(r#"{"status":"success"}"#);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = manager.get(id).unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Cancelled);
        assert_eq!(snapshot.progress_percent, Some(25));
        assert!(refresh_rx.try_recv().is_err());

        // cancelling a terminal task is a no-op
        assert!(!manager.cancel(id));
    }

    #[tokio::test]
    async fn concurrent_pulls_of_one_name_are_independent() {
        let transport = Arc::new(FakeTransport::new());
        let feed_a = transport.queue_pull("llama3.2");
        let feed_b = transport.queue_pull("llama3.2");
        let (manager, _refresh_rx) = manager_with(transport);

        let a = manager.start("llama3.2");
        let b = manager.start("llama3.2");
        assert_ne!(a, b);

        feed_a.line(r#"{"status":"downloading","completed":30,"total":100}"#);
        feed_b.line(r#"{"status":"downloading","completed":30,"total":100}"#);
        wait_until(|| {
            manager
                .get(a)
                .is_some_and(|s| s.status == DownloadStatus::Downloading)
                && manager
                    .get(b)
                    .is_some_and(|s| s.status == DownloadStatus::Downloading)
        })
        .await;

        assert!(manager.cancel(a));
        wait_until(|| {
            manager
                .get(a)
                .is_some_and(|s| s.status == DownloadStatus::Cancelled)
        })
        .await;
        assert_eq!(manager.get(b).unwrap().status, DownloadStatus::Downloading);
        assert!(manager.is_active("llama3.2"));

        feed_a.line(r#"{"status":"success"}"#);
        feed_b.line(r#"{"status":"success"}"#);
        wait_until(|| {
            manager
                .get(b)
                .is_some_and(|s| s.status == DownloadStatus::Completed)
        })
        .await;
        assert!(!manager.is_active("llama3.2"));
    }

    #[tokio::test]
    async fn clear_terminal_leaves_active_tasks() {
        let transport = Arc::new(FakeTransport::new());
        let feed_done = transport.queue_pull("qwen2.5:7b");
        let _feed_live = transport.queue_pull("llama3.2");
        let (manager, _refresh_rx) = manager_with(transport);

        let done = manager.start("qwen2.5:7b");
        let live = manager.start("llama3.2");

        feed_done.line(r#"{"status":"success"}"#);
        wait_until(|| {
            manager
                .get(done)
                .is_some_and(|s| s.status == DownloadStatus::Completed)
        })
        .await;

        assert_eq!(manager.clear_terminal(), 1);
        assert!(manager.get(done).is_none());
        assert!(manager.get(live).is_some());

        let listed = manager.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, live);
    }

    #[tokio::test]
    async fn remove_cancels_an_active_task() {
        let transport = Arc::new(FakeTransport::new());
        let feed = transport.queue_pull("llama3.2");
        let (manager, _refresh_rx) = manager_with(transport);

        let id = manager.start("llama3.2");
        feed.line(r#"{"status":"downloading","completed":1,"total":2}"#);
        wait_until(|| {
            manager
                .get(id)
                .is_some_and(|s| s.status == DownloadStatus::Downloading)
        })
        .await;

        assert!(manager.remove(id));
        assert!(manager.get(id).is_none());
        assert!(!manager.remove(id));
        assert!(!manager.is_active("llama3.2"));
    }

    #[tokio::test]
    async fn list_keeps_creation_order() {
        let transport = Arc::new(FakeTransport::new());
        for name in ["a", "b", "c"] {
            transport.queue_pull(name);
        }
        let (manager, _refresh_rx) = manager_with(transport);

        let first = manager.start("a");
        let second = manager.start("b");
        let third = manager.start("c");

        let ids: Vec<Uuid> = manager.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }
}

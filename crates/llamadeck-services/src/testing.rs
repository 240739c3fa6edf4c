//! Test doubles shared by the service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use llamadeck_client::{ModelTransport, PullStream};
use llamadeck_core::{LlamaDeckError, ModelRecord, Result, RunningModelRecord};
use tokio::sync::mpsc;

/// Scripted [`ModelTransport`]: fixture lists for the aggregator, queued
/// channel-fed pull streams for the download supervisor. Feeding through a
/// channel lets tests control chunk boundaries and stream lifetime exactly.
pub(crate) struct FakeTransport {
    installed: Mutex<Vec<ModelRecord>>,
    running: Mutex<Vec<RunningModelRecord>>,
    fail_installed: AtomicBool,
    fail_running: AtomicBool,
    pulls: Mutex<HashMap<String, VecDeque<Result<PullStream>>>>,
}

/// Sender half of one queued pull stream. Dropping it closes the stream.
pub(crate) struct PullFeed {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl PullFeed {
    pub fn line(&self, json: &str) {
        self.chunk(format!("{}\n", json).as_bytes());
    }

    pub fn chunk(&self, bytes: &[u8]) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(bytes)));
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            installed: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            fail_installed: AtomicBool::new(false),
            fail_running: AtomicBool::new(false),
            pulls: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_installed(&self, models: Vec<ModelRecord>) {
        *self.installed.lock().unwrap() = models;
    }

    pub fn set_running(&self, models: Vec<RunningModelRecord>) {
        *self.running.lock().unwrap() = models;
    }

    pub fn fail_installed(&self, fail: bool) {
        self.fail_installed.store(fail, Ordering::SeqCst);
    }

    pub fn fail_running(&self, fail: bool) {
        self.fail_running.store(fail, Ordering::SeqCst);
    }

    /// Queue a pull stream for `model` and hand back its feeding end.
    /// Successive `start_pull` calls for the same name consume queued streams
    /// in order.
    pub fn queue_pull(&self, model: &str) -> PullFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        self.pulls
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Ok(Box::pin(stream)));
        PullFeed { tx }
    }

    pub fn queue_pull_failure(&self, model: &str, message: &str) {
        self.pulls
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Err(LlamaDeckError::Http(message.to_string())));
    }
}

#[async_trait]
impl ModelTransport for FakeTransport {
    async fn list_installed(&self) -> Result<Vec<ModelRecord>> {
        if self.fail_installed.load(Ordering::SeqCst) {
            return Err(LlamaDeckError::ConnectionRefused);
        }
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn list_running(&self) -> Result<Vec<RunningModelRecord>> {
        if self.fail_running.load(Ordering::SeqCst) {
            return Err(LlamaDeckError::ConnectionRefused);
        }
        Ok(self.running.lock().unwrap().clone())
    }

    async fn start_pull(&self, model: &str) -> Result<PullStream> {
        self.pulls
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(LlamaDeckError::Http(format!("no scripted pull for {}", model)))
            })
    }
}

pub(crate) fn installed_model(name: &str, size: u64) -> ModelRecord {
    ModelRecord {
        name: name.to_string(),
        size,
        digest: format!("sha256:{}", name),
        modified_at: Utc::now(),
        details: None,
    }
}

pub(crate) fn running_model(
    name: &str,
    size: u64,
    size_vram: u64,
    expires_in: Option<chrono::Duration>,
) -> RunningModelRecord {
    RunningModelRecord {
        model: name.to_string(),
        size,
        size_vram,
        expires_at: expires_in.map(|d| Utc::now() + d),
        context_length: None,
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

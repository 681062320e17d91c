//! Durable retry outbox.
//!
//! Queues failed external-sync calls and replays them with exponential
//! backoff until success or a retry ceiling. The queue is persisted on
//! every enqueue (a crash after enqueue never loses the entry) and once
//! after each retry pass (at-least-once delivery: a crash mid-pass may
//! replay an already-successful call on restart).

pub mod http;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::storage::{JsonStore, SYNC_OUTBOX};
use crate::types::FailedSync;

/// Default retry ceiling. After this many failed attempts the entry is
/// dropped and the failure is terminal.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The external document sink the outbox replays into. The production
/// implementation is [`http::HttpSyncTarget`]; tests inject their own.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn upsert_document(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
}

/// Durable retry queue over one persisted dataset.
///
/// The queue lock is never held across a backoff sleep or a sync
/// attempt, so `enqueue` and the query methods stay responsive while a
/// retry pass is sleeping.
pub struct RetryOutbox {
    store: JsonStore,
    queue: Mutex<Option<Vec<FailedSync>>>,
    target: Arc<dyn SyncTarget>,
    max_retries: u32,
    in_flight: AtomicBool,
}

impl RetryOutbox {
    pub fn new(store: JsonStore, target: Arc<dyn SyncTarget>, max_retries: u32) -> Self {
        Self {
            store,
            queue: Mutex::new(None),
            target,
            max_retries,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Add a failed sync to the queue and persist immediately.
    pub async fn enqueue(&self, entry: FailedSync) {
        let mut guard = self.queue.lock().await;
        let queue = self.ensure_loaded(&mut guard);
        queue.push(entry);
        self.store.save(SYNC_OUTBOX, queue);
        warn!(pending = queue.len(), "Sync added to retry queue");
    }

    /// Replay every queued sync once, with `2^retry_count` seconds of
    /// backoff before entries that have already failed at least once.
    /// Concurrent invocations are no-ops. The queue is persisted once
    /// after the whole pass.
    pub async fn process_retry_queue(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            info!("Retry queue already being processed, skipping");
            return;
        }

        self.run_pass().await;

        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn run_pass(&self) {
        let snapshot: Vec<FailedSync> = {
            let mut guard = self.queue.lock().await;
            self.ensure_loaded(&mut guard).clone()
        };
        if snapshot.is_empty() {
            return;
        }

        info!(pending = snapshot.len(), "Processing sync retry queue");

        let mut succeeded: HashSet<Uuid> = HashSet::new();
        let mut failed: HashSet<Uuid> = HashSet::new();

        for entry in &snapshot {
            if entry.retry_count > 0 {
                let backoff = Duration::from_secs(1u64 << entry.retry_count);
                tokio::time::sleep(backoff).await;
            }

            match self
                .target
                .upsert_document(&entry.namespace, &entry.document_id, &entry.text, &entry.metadata)
                .await
            {
                Ok(()) => {
                    info!(document_id = %entry.document_id, "Sync retry successful");
                    succeeded.insert(entry.id);
                }
                Err(e) => {
                    warn!(
                        document_id = %entry.document_id,
                        retry = entry.retry_count + 1,
                        max = self.max_retries,
                        error = %e,
                        "Sync retry failed"
                    );
                    failed.insert(entry.id);
                }
            }
        }

        // Apply results to the live queue: entries enqueued during the
        // pass are untouched.
        let mut guard = self.queue.lock().await;
        let queue = self.ensure_loaded(&mut guard);
        queue.retain_mut(|entry| {
            if succeeded.contains(&entry.id) {
                return false;
            }
            if failed.contains(&entry.id) {
                entry.retry_count += 1;
                if entry.retry_count >= self.max_retries {
                    error!(
                        document_id = %entry.document_id,
                        "Max retries exceeded, dropping sync"
                    );
                    return false;
                }
            }
            true
        });
        self.store.save(SYNC_OUTBOX, queue);

        if queue.is_empty() {
            info!("Sync retry queue fully processed");
        } else {
            warn!(pending = queue.len(), "Syncs still pending after pass");
        }
    }

    /// Number of queued entries.
    pub async fn queue_count(&self) -> usize {
        let mut guard = self.queue.lock().await;
        self.ensure_loaded(&mut guard).len()
    }

    pub async fn has_pending_items(&self) -> bool {
        self.queue_count().await > 0
    }

    fn ensure_loaded<'a>(&self, guard: &'a mut Option<Vec<FailedSync>>) -> &'a mut Vec<FailedSync> {
        guard.get_or_insert_with(|| self.store.load(SYNC_OUTBOX))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

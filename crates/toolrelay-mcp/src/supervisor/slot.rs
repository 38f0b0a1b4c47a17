//! Per-name supervision slot.
//!
//! A slot pairs a single-writer operation lock with a published record.
//! Readers take the current `Arc<ServerProcessRecord>` without touching the
//! operation lock, so `status` never waits behind a slow start or stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use toolrelay_core::{AppEvent, AppEventEmitter, ServerProcessRecord};

use super::process::ProcessHandle;
use crate::client::DiscoveryClient;

/// Live connection to a server: its process (if spawned) and discovery client.
#[derive(Default)]
pub(crate) struct SlotState {
    pub(crate) process: Option<ProcessHandle>,
    pub(crate) client: Option<Arc<DiscoveryClient>>,
}

impl SlotState {
    /// Whether the connection can still be used.
    pub(crate) fn is_live(&self) -> bool {
        self.client.is_some() && self.process.as_ref().is_none_or(ProcessHandle::is_alive)
    }

    /// Drop a connection whose process has gone away.
    pub(crate) fn reconcile(&mut self) -> bool {
        if self.client.is_some() && !self.is_live() {
            self.client = None;
            self.process = None;
            return true;
        }
        false
    }
}

pub(crate) struct ServerSlot {
    /// Serializes start/stop/refresh for this name.
    pub(crate) op: Mutex<SlotState>,
    record: watch::Sender<Arc<ServerProcessRecord>>,
    /// Completed start attempts; lets queued starters adopt an outcome.
    attempts: AtomicU64,
    emitter: Arc<dyn AppEventEmitter>,
}

impl ServerSlot {
    pub(crate) fn new(record: ServerProcessRecord, emitter: Arc<dyn AppEventEmitter>) -> Self {
        let (record, _) = watch::channel(Arc::new(record));
        Self {
            op: Mutex::new(SlotState::default()),
            record,
            attempts: AtomicU64::new(0),
            emitter,
        }
    }

    pub(crate) fn current(&self) -> Arc<ServerProcessRecord> {
        self.record.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<ServerProcessRecord>> {
        self.record.subscribe()
    }

    /// Replace the record with a complete new value.
    pub(crate) fn publish(&self, record: ServerProcessRecord) -> Arc<ServerProcessRecord> {
        let record = Arc::new(record);
        self.record.send_replace(record.clone());
        record
    }

    /// Replace the record only if `cond` holds for the current one.
    pub(crate) fn publish_if(
        &self,
        cond: impl FnOnce(&ServerProcessRecord) -> bool,
        next: impl FnOnce(&ServerProcessRecord) -> ServerProcessRecord,
    ) -> bool {
        self.record.send_if_modified(|current| {
            if cond(current) {
                *current = Arc::new(next(current));
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn finish_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: AppEvent) {
        self.emitter.emit(event);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use uuid::Uuid;

/// One-shot "host-create finished" signals keyed by requester id.
#[derive(Debug, Clone, Default)]
pub struct CompletionRegistry {
    signals: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, requester_id: Uuid) -> watch::Receiver<bool> {
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals
            .entry(requester_id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Wake every subscriber of `requester_id`. Receivers keep seeing
    /// `true` after the entry is gone.
    pub fn complete(&self, requester_id: Uuid) {
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = signals.remove(&requester_id) {
            tx.send_replace(true);
        }
    }

    /// Drop the entry for `requester_id` once nobody listens to it.
    pub fn release(&self, requester_id: Uuid) {
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        if signals
            .get(&requester_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            signals.remove(&requester_id);
        }
    }

    pub fn len(&self) -> usize {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

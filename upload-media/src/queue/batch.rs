//! Completion counting for batches of items.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::item::{Attachment, BatchId};
use crate::notification::{UploadListener, UploadNotification};

#[derive(Debug, Default)]
struct BatchState {
    pending: usize,
    attachments: Vec<Attachment>,
    listeners: Vec<UploadListener>,
}

/// Tracks outstanding members per batch and fires the batch result once.
///
/// A batch is done when every registered member reached a terminal state.
/// Only successful members contribute attachments; a batch without any
/// success reports nothing.
#[derive(Debug, Default)]
pub struct BatchTracker {
    batches: Mutex<HashMap<BatchId, BatchState>>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more member of `batch_id`.
    pub fn register(&self, batch_id: BatchId, listener: Option<&UploadListener>) {
        let mut batches = self.batches.lock();
        let batch = batches.entry(batch_id).or_default();
        batch.pending += 1;
        if let Some(listener) = listener
            && !batch.listeners.iter().any(|l| l.same_channel(listener))
        {
            batch.listeners.push(listener.clone());
        }
    }

    /// Record a member's outcome; `None` for a cancelled member.
    ///
    /// Returns `true` when this call completed the batch.
    pub fn complete(&self, batch_id: BatchId, attachment: Option<Attachment>) -> bool {
        let finished = {
            let mut batches = self.batches.lock();
            let Some(batch) = batches.get_mut(&batch_id) else {
                return false;
            };
            batch.pending = batch.pending.saturating_sub(1);
            if let Some(attachment) = attachment {
                batch.attachments.push(attachment);
            }
            if batch.pending > 0 {
                return false;
            }
            batches.remove(&batch_id)
        };

        let Some(batch) = finished else {
            return false;
        };

        debug!(
            batch_id = %batch_id,
            succeeded = batch.attachments.len(),
            "Batch finished"
        );
        if !batch.attachments.is_empty() {
            for listener in &batch.listeners {
                listener.notify(UploadNotification::BatchSucceeded(batch.attachments.clone()));
            }
        }
        true
    }

    pub fn pending(&self, batch_id: BatchId) -> usize {
        self.batches
            .lock()
            .get(&batch_id)
            .map(|b| b.pending)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(id: u64) -> Attachment {
        Attachment {
            id: Some(id),
            ..Default::default()
        }
    }

    #[test]
    fn test_fires_once_after_all_members() {
        let tracker = BatchTracker::new();
        let (listener, mut rx) = UploadListener::channel();
        let batch = BatchId::new();
        for _ in 0..3 {
            tracker.register(batch, Some(&listener));
        }

        assert!(!tracker.complete(batch, Some(attachment(1))));
        assert!(!tracker.complete(batch, None));
        assert!(tracker.complete(batch, Some(attachment(3))));
        assert!(!tracker.complete(batch, Some(attachment(4))));

        match rx.try_recv() {
            Ok(UploadNotification::BatchSucceeded(list)) => {
                let ids: Vec<_> = list.iter().filter_map(|a| a.id).collect();
                assert_eq!(ids, vec![1, 3]);
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_all_failed_batch_is_silent() {
        let tracker = BatchTracker::new();
        let (listener, mut rx) = UploadListener::channel();
        let batch = BatchId::new();
        tracker.register(batch, Some(&listener));

        assert!(tracker.complete(batch, None));
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.pending(batch), 0);
    }

    #[test]
    fn test_distinct_listeners_each_notified() {
        let tracker = BatchTracker::new();
        let (a, mut rx_a) = UploadListener::channel();
        let (b, mut rx_b) = UploadListener::channel();
        let batch = BatchId::new();
        tracker.register(batch, Some(&a));
        tracker.register(batch, Some(&b));

        tracker.complete(batch, Some(attachment(1)));
        tracker.complete(batch, Some(attachment(2)));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}

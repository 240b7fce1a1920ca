//! Per-item notifications delivered to the caller.

use tokio::sync::mpsc;

use crate::error::UploadError;
use crate::queue::Attachment;

/// Outcome events for an item, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadNotification {
    /// The attachment projection changed (preview URL, transcoded preview, remote data).
    Changed(Attachment),
    /// The item was uploaded.
    Succeeded(Attachment),
    /// The item was cancelled.
    Failed(UploadError),
    /// Every member of the item's batch is done; carries the successful attachments.
    BatchSucceeded(Vec<Attachment>),
}

/// Sending half handed to the queue with an item.
///
/// Several items may share one listener; batch results are delivered once per
/// distinct channel.
#[derive(Debug, Clone)]
pub struct UploadListener {
    tx: mpsc::UnboundedSender<UploadNotification>,
}

impl UploadListener {
    /// Create a listener and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, notification: UploadNotification) {
        // Receiver may be gone; nobody is listening then.
        let _ = self.tx.send(notification);
    }

    pub fn same_channel(&self, other: &UploadListener) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl From<mpsc::UnboundedSender<UploadNotification>> for UploadListener {
    fn from(tx: mpsc::UnboundedSender<UploadNotification>) -> Self {
        Self { tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_delivers_in_order() {
        let (listener, mut rx) = UploadListener::channel();
        listener.notify(UploadNotification::Changed(Attachment::with_url("blob:1")));
        listener.notify(UploadNotification::BatchSucceeded(vec![]));

        assert!(matches!(rx.recv().await, Some(UploadNotification::Changed(_))));
        assert!(matches!(
            rx.recv().await,
            Some(UploadNotification::BatchSucceeded(v)) if v.is_empty()
        ));
    }

    #[test]
    fn test_same_channel() {
        let (a, _rx_a) = UploadListener::channel();
        let (b, _rx_b) = UploadListener::channel();
        assert!(a.same_channel(&a.clone()));
        assert!(!a.same_channel(&b));
    }

    #[test]
    fn test_notify_without_receiver_is_silent() {
        let (listener, rx) = UploadListener::channel();
        drop(rx);
        listener.notify(UploadNotification::Succeeded(Attachment::default()));
    }
}

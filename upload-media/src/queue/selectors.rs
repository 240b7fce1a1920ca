//! Read-only views over the queue state.

use std::sync::Arc;

use super::item::{ImageSizeCrop, ItemStatus, QueueItem, QueueItemId};
use super::reducer::State;

impl State {
    pub fn get_item(&self, id: QueueItemId) -> Option<Arc<QueueItem>> {
        self.queue.iter().find(|item| item.id == id).cloned()
    }

    pub fn get_items(&self) -> &[Arc<QueueItem>] {
        &self.queue
    }

    /// Item whose attachment carries the remote id `attachment_id`.
    pub fn get_item_by_attachment_id(&self, attachment_id: u64) -> Option<Arc<QueueItem>> {
        self.queue
            .iter()
            .find(|item| item.attachment.id == Some(attachment_id))
            .cloned()
    }

    /// Whether any item is running a throttled transcode step.
    pub fn is_transcoding(&self) -> bool {
        self.queue.iter().any(|item| item.is_transcoding_throttled())
    }

    pub fn is_uploading(&self) -> bool {
        self.queue
            .iter()
            .any(|item| item.status == ItemStatus::Uploading)
    }

    pub fn is_pending_approval(&self) -> bool {
        self.queue
            .iter()
            .any(|item| item.status == ItemStatus::PendingApproval)
    }

    pub fn get_media_source_term_id(&self, slug: &str) -> Option<u64> {
        self.media_source_terms.get(slug).copied()
    }

    pub fn get_image_size(&self, name: &str) -> Option<ImageSizeCrop> {
        self.image_sizes.get(name).cloned()
    }
}

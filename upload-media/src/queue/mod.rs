//! Queue state, transitions and batch bookkeeping.

mod batch;
mod item;
mod reducer;
mod selectors;
mod store;

pub use batch::BatchTracker;
pub use item::{
    AdditionalData, Attachment, AttachmentImage, BatchId, ImageSizeCrop, ItemStatus, QueueItem,
    QueueItemId, TranscodingType, merge_additional_data,
};
pub use reducer::{Action, State, reduce};
pub use store::{QueueEvent, QueueStore};

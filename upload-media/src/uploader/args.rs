//! Arguments of the queue's entry points.

use media_utils::MediaFile;

use crate::notification::UploadListener;
use crate::queue::{AdditionalData, BatchId, ImageSizeCrop, TranscodingType};

/// A file to enqueue.
///
/// Start from [`AddItemArgs::new`] and override fields with struct update
/// syntax.
#[derive(Debug, Clone)]
pub struct AddItemArgs {
    pub file: MediaFile,
    pub batch_id: Option<BatchId>,
    pub additional_data: AdditionalData,
    pub source_url: Option<String>,
    pub source_attachment_id: Option<u64>,
    pub media_source_terms: Vec<String>,
    pub blur_hash: Option<String>,
    pub dominant_color: Option<String>,
    /// Resize target; defaults to the big image size threshold.
    pub resize: Option<ImageSizeCrop>,
    /// Fixed plan that skips classification.
    pub transcode: Option<Vec<TranscodingType>>,
    pub is_sideload: bool,
    pub listener: Option<UploadListener>,
}

impl AddItemArgs {
    pub fn new(file: MediaFile) -> Self {
        Self {
            file,
            batch_id: None,
            additional_data: AdditionalData::new(),
            source_url: None,
            source_attachment_id: None,
            media_source_terms: Vec::new(),
            blur_hash: None,
            dominant_color: None,
            resize: None,
            transcode: None,
            is_sideload: false,
            listener: None,
        }
    }
}

/// A file attached to an existing attachment (image size, original, ...).
///
/// `additional_data` must carry the parent attachment id as `post`.
#[derive(Debug, Clone)]
pub struct AddSideloadItemArgs {
    pub file: MediaFile,
    pub batch_id: Option<BatchId>,
    pub additional_data: AdditionalData,
    pub resize: Option<ImageSizeCrop>,
    pub transcode: Option<Vec<TranscodingType>>,
}

impl AddSideloadItemArgs {
    pub fn new(file: MediaFile, attachment_id: u64) -> Self {
        let mut additional_data = AdditionalData::new();
        additional_data.insert("post".to_string(), attachment_id.into());
        Self {
            file,
            batch_id: None,
            additional_data,
            resize: None,
            transcode: None,
        }
    }
}

/// Several files validated and enqueued as one batch.
#[derive(Debug, Clone, Default)]
pub struct UploadMediaArgs {
    pub files: Vec<MediaFile>,
    pub additional_data: AdditionalData,
    /// Overrides the queue's allow-list for this call.
    pub allowed_types: Option<Vec<String>>,
    pub listener: Option<UploadListener>,
}

/// An already uploaded attachment to re-process.
#[derive(Debug, Clone)]
pub struct ExistingItemArgs {
    /// Attachment id of the existing item.
    pub id: u64,
    pub url: String,
    pub poster: Option<String>,
    pub batch_id: Option<BatchId>,
    pub additional_data: AdditionalData,
    pub blur_hash: Option<String>,
    pub dominant_color: Option<String>,
    pub generated_poster_id: Option<u64>,
    pub listener: Option<UploadListener>,
}

impl ExistingItemArgs {
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            poster: None,
            batch_id: None,
            additional_data: AdditionalData::new(),
            blur_hash: None,
            dominant_color: None,
            generated_poster_id: None,
            listener: None,
        }
    }
}

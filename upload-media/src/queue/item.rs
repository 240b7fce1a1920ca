//! Queue item model.

use std::fmt;

use media_utils::MediaFile;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::UploadError;
use crate::notification::UploadListener;

/// Free-form payload merged into the upload request.
pub type AdditionalData = serde_json::Map<String, Value>;

/// Shallow merge of `extra` into `base`; keys in `extra` win.
pub fn merge_additional_data(base: &mut AdditionalData, extra: AdditionalData) {
    for (key, value) in extra {
        base.insert(key, value);
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a queue item, stable for its lifetime.
    QueueItemId
);

uuid_id!(
    /// Identifier shared by items added together.
    BatchId
);

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Preparing,
    PendingTranscoding,
    Transcoding,
    Transcoded,
    PendingApproval,
    Approved,
    Uploading,
    Uploaded,
    Cancelled,
}

impl ItemStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Uploaded | ItemStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Preparing => "preparing",
            ItemStatus::PendingTranscoding => "pending_transcoding",
            ItemStatus::Transcoding => "transcoding",
            ItemStatus::Transcoded => "transcoded",
            ItemStatus::PendingApproval => "pending_approval",
            ItemStatus::Approved => "approved",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Uploaded => "uploaded",
            ItemStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a transcode plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodingType {
    ResizeCrop,
    Heif,
    Gif,
    Audio,
    Video,
    MuteVideo,
    Image,
    OptimizeExisting,
}

impl TranscodingType {
    /// Heavy steps share a single global slot; resizing and HEIF decoding do not.
    #[inline]
    pub fn is_throttled(self) -> bool {
        !matches!(self, TranscodingType::ResizeCrop | TranscodingType::Heif)
    }
}

/// Target dimensions of a resize step, usually a named image size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSizeCrop {
    pub width: u32,
    pub height: u32,
    /// Hard crop to the exact dimensions instead of fitting inside them.
    #[serde(default)]
    pub crop: bool,
    /// Image size name, sent as `image_size` when sideloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ImageSizeCrop {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            crop: false,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Poster structure expected by video blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentImage {
    pub src: String,
}

/// Projection of the remote attachment, filled in as information arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<AttachmentImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_image_sizes: Vec<String>,
}

impl Attachment {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Overlay `update` onto `self`; fields absent from `update` are kept.
    pub fn merged(&self, update: &Attachment) -> Attachment {
        fn pick<T: Clone>(new: &Option<T>, old: &Option<T>) -> Option<T> {
            new.clone().or_else(|| old.clone())
        }

        Attachment {
            id: update.id.or(self.id),
            url: pick(&update.url, &self.url),
            mime_type: pick(&update.mime_type, &self.mime_type),
            file_name: pick(&update.file_name, &self.file_name),
            poster: pick(&update.poster, &self.poster),
            poster_id: update.poster_id.or(self.poster_id),
            image: pick(&update.image, &self.image),
            title: pick(&update.title, &self.title),
            alt: pick(&update.alt, &self.alt),
            caption: pick(&update.caption, &self.caption),
            blur_hash: pick(&update.blur_hash, &self.blur_hash),
            dominant_color: pick(&update.dominant_color, &self.dominant_color),
            missing_image_sizes: if update.missing_image_sizes.is_empty() {
                self.missing_image_sizes.clone()
            } else {
                update.missing_image_sizes.clone()
            },
        }
    }
}

/// One file's journey through the pipeline.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub batch_id: Option<BatchId>,
    pub status: ItemStatus,
    /// Original input, never replaced.
    pub source_file: MediaFile,
    /// Current working file, replaced by every transcode step.
    pub file: MediaFile,
    /// Still frame extracted from a video or PDF.
    pub poster: Option<MediaFile>,
    pub attachment: Attachment,
    pub additional_data: AdditionalData,
    /// `None` until classified; an empty plan skips transcoding.
    pub transcode: Option<Vec<TranscodingType>>,
    pub resize: Option<ImageSizeCrop>,
    pub is_sideload: bool,
    pub media_source_terms: Vec<String>,
    pub blur_hash: Option<String>,
    pub dominant_color: Option<String>,
    pub source_url: Option<String>,
    pub source_attachment_id: Option<u64>,
    pub generated_poster_id: Option<u64>,
    pub listener: Option<UploadListener>,
    /// Set only once cancelled.
    pub error: Option<UploadError>,
}

impl QueueItem {
    /// A fresh `Pending` item for `file`.
    pub fn new(file: MediaFile) -> Self {
        Self {
            id: QueueItemId::new(),
            batch_id: None,
            status: ItemStatus::Pending,
            source_file: file.clone(),
            file,
            poster: None,
            attachment: Attachment::default(),
            additional_data: AdditionalData::new(),
            transcode: None,
            resize: None,
            is_sideload: false,
            media_source_terms: Vec::new(),
            blur_hash: None,
            dominant_color: None,
            source_url: None,
            source_attachment_id: None,
            generated_poster_id: None,
            listener: None,
            error: None,
        }
    }

    /// Next plan step, if any.
    pub fn current_step(&self) -> Option<TranscodingType> {
        self.transcode.as_ref().and_then(|plan| plan.first().copied())
    }

    /// Whether the item is running a step that holds the global transcode slot.
    pub fn is_transcoding_throttled(&self) -> bool {
        self.status == ItemStatus::Transcoding
            && self.current_step().is_some_and(TranscodingType::is_throttled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_throttled_kinds() {
        assert!(!TranscodingType::ResizeCrop.is_throttled());
        assert!(!TranscodingType::Heif.is_throttled());
        assert!(TranscodingType::Gif.is_throttled());
        assert!(TranscodingType::Video.is_throttled());
        assert!(TranscodingType::OptimizeExisting.is_throttled());
    }

    #[test]
    fn test_attachment_merge_keeps_known_fields() {
        let local = Attachment {
            url: Some("blob:1".into()),
            poster: Some("blob:2".into()),
            ..Default::default()
        };
        let remote = Attachment {
            id: Some(7),
            url: Some("https://example.com/a.mp4".into()),
            mime_type: Some("video/mp4".into()),
            ..Default::default()
        };

        let merged = local.merged(&remote);
        assert_eq!(merged.id, Some(7));
        assert_eq!(merged.url.as_deref(), Some("https://example.com/a.mp4"));
        assert_eq!(merged.poster.as_deref(), Some("blob:2"));
    }

    #[test]
    fn test_merge_additional_data() {
        let mut base = json!({"post": 1, "generate_sub_sizes": false})
            .as_object()
            .cloned()
            .unwrap();
        let extra = json!({"generate_sub_sizes": true, "mexp_is_muted": true})
            .as_object()
            .cloned()
            .unwrap();

        merge_additional_data(&mut base, extra);
        assert_eq!(base["post"], 1);
        assert_eq!(base["generate_sub_sizes"], true);
        assert_eq!(base["mexp_is_muted"], true);
    }

    #[test]
    fn test_status_terminal() {
        assert!(ItemStatus::Uploaded.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
        assert!(!ItemStatus::PendingApproval.is_terminal());
        assert_eq!(ItemStatus::PendingTranscoding.to_string(), "pending_transcoding");
    }
}

//! Preferences and process-level queue configuration.

mod preferences;

pub use preferences::{
    AudioFormat, ImageFormatPreference, ImageLibrary, PreferenceStore, ThumbnailGeneration,
    UploadPreferences, VideoFormat,
};

use serde::{Deserialize, Serialize};

use crate::validation::ValidationConfig;

/// Settings fixed for the lifetime of an [`UploadQueue`](crate::UploadQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Whether an isolated execution context is available; gates transparency detection.
    #[serde(default)]
    pub isolated_context: bool,
    /// Allow-list and size limit applied by `upload_media`.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Capacity of the queue event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            isolated_context: false,
            validation: ValidationConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

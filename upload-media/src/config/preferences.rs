//! User preferences consulted at every pipeline decision point.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

/// Which image library runs resize/compress operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageLibrary {
    #[default]
    Vips,
    Browser,
}

/// Where sub-sizes (thumbnails) are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailGeneration {
    /// The server generates all sizes.
    Server,
    /// Client side, plain center crop.
    Client,
    /// Client side with attention-based crop.
    #[default]
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Webm,
    Ogg,
}

impl VideoFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "video/mp4",
            VideoFormat::Webm => "video/webm",
            VideoFormat::Ogg => "video/ogg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Ogg,
}

impl AudioFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mp3",
            AudioFormat::Ogg => "audio/ogg",
        }
    }
}

/// Output settings for one input image format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFormatPreference {
    /// Target format as an extension (`webp`, `avif`, ...). Defaults to the input format.
    #[serde(default)]
    pub output_format: Option<String>,
    /// Encoder quality, 1-100.
    #[serde(default)]
    pub quality: Option<u8>,
}

/// Snapshot of the upload preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPreferences {
    #[serde(default)]
    pub image_library: ImageLibrary,
    /// Longest edge for uploaded images. 0 disables the ceiling.
    #[serde(default = "default_big_image_size_threshold")]
    pub big_image_size_threshold: u32,
    /// Longest edge for transcoded videos. 0 disables scaling.
    #[serde(default = "default_big_video_size_threshold")]
    pub big_video_size_threshold: u32,
    #[serde(default)]
    pub thumbnail_generation: ThumbnailGeneration,
    /// Convert animated GIFs to video.
    #[serde(default = "default_true")]
    pub gif_convert: bool,
    #[serde(default = "default_true")]
    pub optimize_on_upload: bool,
    /// Sideload the untouched original when the upload was scaled down.
    #[serde(default)]
    pub keep_original: bool,
    /// Hold optimized copies of existing attachments for a human decision.
    #[serde(default = "default_true")]
    pub require_approval: bool,
    #[serde(default)]
    pub video_output_format: VideoFormat,
    #[serde(default)]
    pub audio_output_format: AudioFormat,
    #[serde(default = "default_output_quality")]
    pub default_output_quality: u8,
    /// Keyed by input extension (`jpeg`, `png`, ...).
    #[serde(default)]
    pub image_formats: HashMap<String, ImageFormatPreference>,
    /// Whether the browser image library can encode WebP.
    #[serde(default = "default_true")]
    pub browser_supports_webp: bool,
}

fn default_big_image_size_threshold() -> u32 {
    2560
}

fn default_big_video_size_threshold() -> u32 {
    1920
}

fn default_output_quality() -> u8 {
    80
}

fn default_true() -> bool {
    true
}

impl Default for UploadPreferences {
    fn default() -> Self {
        Self {
            image_library: ImageLibrary::default(),
            big_image_size_threshold: default_big_image_size_threshold(),
            big_video_size_threshold: default_big_video_size_threshold(),
            thumbnail_generation: ThumbnailGeneration::default(),
            gif_convert: true,
            optimize_on_upload: true,
            keep_original: false,
            require_approval: true,
            video_output_format: VideoFormat::default(),
            audio_output_format: AudioFormat::default(),
            default_output_quality: default_output_quality(),
            image_formats: HashMap::new(),
            browser_supports_webp: true,
        }
    }
}

impl UploadPreferences {
    /// Output format for an input extension; the input format itself if unset.
    pub fn output_format_for(&self, input_format: &str) -> String {
        self.image_formats
            .get(input_format)
            .and_then(|p| p.output_format.clone())
            .unwrap_or_else(|| input_format.to_string())
    }

    /// Encoder quality for an input extension, clamped to 1..=100.
    pub fn quality_for(&self, input_format: &str) -> u8 {
        self.image_formats
            .get(input_format)
            .and_then(|p| p.quality)
            .unwrap_or(self.default_output_quality)
            .clamp(1, 100)
    }
}

/// Shared, atomically replaceable preference snapshot.
///
/// Readers get an `Arc` snapshot and never hold the lock.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    current: RwLock<Arc<UploadPreferences>>,
}

impl PreferenceStore {
    pub fn new(preferences: UploadPreferences) -> Self {
        Self {
            current: RwLock::new(Arc::new(preferences)),
        }
    }

    /// Load preferences from a JSON file. Missing keys take their defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let preferences: UploadPreferences = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "Loaded upload preferences");
        Ok(Self::new(preferences))
    }

    pub fn snapshot(&self) -> Arc<UploadPreferences> {
        self.current.read().clone()
    }

    /// Apply `f` to a copy of the current preferences and publish the result.
    pub fn update(&self, f: impl FnOnce(&mut UploadPreferences)) {
        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
        debug!("Upload preferences updated");
    }

    pub fn replace(&self, preferences: UploadPreferences) {
        *self.current.write() = Arc::new(preferences);
    }
}

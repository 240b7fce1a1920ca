//! Contracts of the transcoding and analysis collaborators.
//!
//! Engines receive the working file (or a URL to it) and return a new file;
//! they never touch queue state.

use std::sync::Arc;

use async_trait::async_trait;
use media_utils::MediaFile;

use super::ffmpeg::FfmpegEngine;
use crate::config::ImageLibrary;
use crate::error::EngineError;
use crate::queue::ImageSizeCrop;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Raster image operations (vips or the browser canvas).
#[async_trait]
pub trait ImageEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Re-encode in the same format. `quality` is in `0.0..=1.0`.
    async fn compress(&self, file: &MediaFile, quality: f32) -> EngineResult<MediaFile>;

    async fn convert_format(
        &self,
        file: &MediaFile,
        mime_type: &str,
        quality: f32,
    ) -> EngineResult<MediaFile>;

    /// Scale (and optionally crop) to `size`. The result carries its dimensions;
    /// with `add_suffix` the name gains `-{w}x{h}` when the size changed.
    async fn resize(
        &self,
        file: &MediaFile,
        size: &ImageSizeCrop,
        smart_crop: bool,
        add_suffix: bool,
    ) -> EngineResult<MediaFile>;

    async fn has_transparency(&self, url: &str) -> EngineResult<bool>;
}

#[async_trait]
pub trait HeifEngine: Send + Sync {
    /// Decode HEIF/HEIC into a format the rest of the pipeline understands.
    async fn transcode_heif(&self, file: &MediaFile) -> EngineResult<MediaFile>;
}

/// Audio/video operations.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn can_transcode(&self, file: &MediaFile) -> bool;

    async fn transcode_video(
        &self,
        file: &MediaFile,
        mime_type: &str,
        threshold: u32,
    ) -> EngineResult<MediaFile>;

    async fn transcode_audio(&self, file: &MediaFile, mime_type: &str) -> EngineResult<MediaFile>;

    async fn convert_gif_to_video(
        &self,
        file: &MediaFile,
        mime_type: &str,
        threshold: u32,
    ) -> EngineResult<MediaFile> {
        self.transcode_video(file, mime_type, threshold).await
    }

    /// Strip the audio track, keeping the container.
    async fn mute_video(&self, file: &MediaFile) -> EngineResult<MediaFile>;

    /// Still frame named `{basename}.jpeg`.
    async fn poster_from_video(&self, url: &str, basename: &str) -> EngineResult<MediaFile>;

    async fn video_has_audio(&self, url: &str) -> EngineResult<bool>;
}

#[async_trait]
pub trait PdfEngine: Send + Sync {
    /// Raster of the first page named `{basename}.jpeg`.
    async fn image_from_pdf(&self, url: &str, basename: &str) -> EngineResult<MediaFile>;
}

#[async_trait]
pub trait SubtitleEngine: Send + Sync {
    /// WebVTT track for a video.
    async fn generate_subtitles(&self, file: &MediaFile) -> EngineResult<MediaFile>;
}

/// Preview descriptor workers.
#[async_trait]
pub trait AnalysisWorkers: Send + Sync {
    async fn dominant_color(&self, url: &str) -> EngineResult<String>;

    async fn blurhash(&self, url: &str) -> EngineResult<String>;
}

/// Stand-in for collaborators that are not wired up. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

#[async_trait]
impl ImageEngine for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn compress(&self, _file: &MediaFile, _quality: f32) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("image engine"))
    }

    async fn convert_format(
        &self,
        _file: &MediaFile,
        _mime_type: &str,
        _quality: f32,
    ) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("image engine"))
    }

    async fn resize(
        &self,
        _file: &MediaFile,
        _size: &ImageSizeCrop,
        _smart_crop: bool,
        _add_suffix: bool,
    ) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("image engine"))
    }

    async fn has_transparency(&self, _url: &str) -> EngineResult<bool> {
        Err(EngineError::Unavailable("image engine"))
    }
}

#[async_trait]
impl HeifEngine for Unavailable {
    async fn transcode_heif(&self, _file: &MediaFile) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("HEIF decoder"))
    }
}

#[async_trait]
impl PdfEngine for Unavailable {
    async fn image_from_pdf(&self, _url: &str, _basename: &str) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("PDF renderer"))
    }
}

#[async_trait]
impl SubtitleEngine for Unavailable {
    async fn generate_subtitles(&self, _file: &MediaFile) -> EngineResult<MediaFile> {
        Err(EngineError::Unavailable("subtitle generator"))
    }
}

#[async_trait]
impl AnalysisWorkers for Unavailable {
    async fn dominant_color(&self, _url: &str) -> EngineResult<String> {
        Err(EngineError::Unavailable("dominant color worker"))
    }

    async fn blurhash(&self, _url: &str) -> EngineResult<String> {
        Err(EngineError::Unavailable("blurhash worker"))
    }
}

/// Collaborator handles used by the queue.
#[derive(Clone)]
pub struct Engines {
    pub vips: Arc<dyn ImageEngine>,
    /// Canvas-style library; `None` means every image op goes through `vips`.
    pub browser: Option<Arc<dyn ImageEngine>>,
    pub heif: Arc<dyn HeifEngine>,
    pub media: Arc<dyn MediaEngine>,
    pub pdf: Arc<dyn PdfEngine>,
    pub subtitles: Arc<dyn SubtitleEngine>,
    pub analysis: Arc<dyn AnalysisWorkers>,
}

impl Engines {
    /// Image engine for `library`, falling back to vips.
    pub fn image(&self, library: ImageLibrary) -> &Arc<dyn ImageEngine> {
        match (library, &self.browser) {
            (ImageLibrary::Browser, Some(browser)) => browser,
            _ => &self.vips,
        }
    }
}

impl Default for Engines {
    fn default() -> Self {
        Self {
            vips: Arc::new(Unavailable),
            browser: None,
            heif: Arc::new(Unavailable),
            media: Arc::new(FfmpegEngine::new()),
            pdf: Arc::new(Unavailable),
            subtitles: Arc::new(Unavailable),
            analysis: Arc::new(Unavailable),
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("vips", &self.vips.name())
            .field("browser", &self.browser.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

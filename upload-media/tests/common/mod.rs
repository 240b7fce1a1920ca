//! Hand-written collaborators for the queue integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use media_utils::{ImageDimensions, MediaFile, file_basename, resized_file_name};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use upload_media::error::EngineError;
use upload_media::queue::{AdditionalData, ImageSizeCrop};
use upload_media::transcode::{EngineResult, ImageEngine, MediaEngine, PdfEngine};
use upload_media::{
    Attachment, Engines, MediaTransport, PreferenceStore, QueueConfig, UploadNotification,
    UploadPreferences, UploadQueue,
};

/// Dimensions assumed for images that never went through a resize.
const SOURCE_SIZE: (u32, u32) = (1000, 800);

pub fn jpeg(name: &str) -> MediaFile {
    MediaFile::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

pub fn video(name: &str) -> MediaFile {
    MediaFile::new(name, "video/quicktime", vec![0u8, 0, 0, 0x14, b'f', b't', b'y', b'p'])
}

/// Two-frame GIF.
pub fn animated_gif(name: &str) -> MediaFile {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0]);
    for _ in 0..2 {
        data.extend_from_slice(&[0x00, 0x21, 0xF9, 0x04, 0x04, 0x0A, 0x00, 0x00, 0x00, 0x2C]);
        data.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0, 0, 0x02, 0x02, 0x44, 0x01]);
    }
    data.push(0x3B);
    MediaFile::new(name, "image/gif", data)
}

#[derive(Default)]
pub struct FakeImage {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageEngine for FakeImage {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn compress(&self, file: &MediaFile, quality: f32) -> EngineResult<MediaFile> {
        self.calls
            .lock()
            .push(format!("compress {} {quality:.2}", file.name()));
        Ok(file.clone())
    }

    async fn convert_format(
        &self,
        file: &MediaFile,
        mime_type: &str,
        _quality: f32,
    ) -> EngineResult<MediaFile> {
        self.calls
            .lock()
            .push(format!("convert {} {mime_type}", file.name()));
        let ext = mime_type.trim_start_matches("image/");
        let name = format!("{}.{ext}", file_basename(file.name()));
        Ok(MediaFile::new(name, mime_type, file.data().clone()))
    }

    async fn resize(
        &self,
        file: &MediaFile,
        size: &ImageSizeCrop,
        _smart_crop: bool,
        add_suffix: bool,
    ) -> EngineResult<MediaFile> {
        self.calls
            .lock()
            .push(format!(
                "resize {} {}x{}{}",
                file.name(),
                size.width,
                size.height,
                if size.crop { " crop" } else { "" }
            ));
        let (width, height) = file
            .dimensions()
            .map(|d| (d.width, d.height))
            .unwrap_or(SOURCE_SIZE);
        let scale = f64::min(
            1.0,
            f64::min(
                f64::from(size.width) / f64::from(width),
                f64::from(size.height) / f64::from(height),
            ),
        );
        let dimensions = ImageDimensions::new(
            (f64::from(width) * scale).round() as u32,
            (f64::from(height) * scale).round() as u32,
            width,
            height,
        );
        let name = resized_file_name(file.name(), &dimensions, add_suffix);
        Ok(file.renamed(name).with_dimensions(dimensions))
    }

    async fn has_transparency(&self, _url: &str) -> EngineResult<bool> {
        Ok(false)
    }
}

/// Video/audio engine that sleeps for `delay` and tracks overlapping runs.
#[derive(Default)]
pub struct FakeMedia {
    pub delay: Duration,
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeMedia {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    async fn work(&self, call: String) -> EngineResult<()> {
        self.calls.lock().push(call);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::failed("fake engine failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    fn can_transcode(&self, file: &MediaFile) -> bool {
        let mime = file.mime_type();
        mime.starts_with("video/") || mime.starts_with("audio/") || mime == "image/gif"
    }

    async fn transcode_video(
        &self,
        file: &MediaFile,
        mime_type: &str,
        _threshold: u32,
    ) -> EngineResult<MediaFile> {
        self.work(format!("video {}", file.name())).await?;
        let name = format!("{}.mp4", file.basename());
        Ok(MediaFile::new(name, mime_type, file.data().clone()))
    }

    async fn transcode_audio(&self, file: &MediaFile, mime_type: &str) -> EngineResult<MediaFile> {
        self.work(format!("audio {}", file.name())).await?;
        let name = format!("{}.mp3", file.basename());
        Ok(MediaFile::new(name, mime_type, file.data().clone()))
    }

    async fn mute_video(&self, file: &MediaFile) -> EngineResult<MediaFile> {
        self.work(format!("mute {}", file.name())).await?;
        Ok(file.clone())
    }

    async fn poster_from_video(&self, _url: &str, basename: &str) -> EngineResult<MediaFile> {
        Ok(jpeg(&format!("{basename}.jpeg")))
    }

    async fn video_has_audio(&self, _url: &str) -> EngineResult<bool> {
        Ok(true)
    }
}

/// First-page rasterizer that records the requested basenames.
#[derive(Default)]
pub struct FakePdf {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PdfEngine for FakePdf {
    async fn image_from_pdf(&self, _url: &str, basename: &str) -> EngineResult<MediaFile> {
        self.calls.lock().push(basename.to_string());
        Ok(jpeg(&format!("{basename}.jpeg")))
    }
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub data: AdditionalData,
    /// Parent attachment of a sideload.
    pub parent: Option<u64>,
}

/// In-memory attachment store. Ids start at 100.
pub struct FakeTransport {
    pub next_id: AtomicU64,
    pub missing_image_sizes: Vec<String>,
    pub remote_files: HashMap<String, MediaFile>,
    /// Reject every primary upload.
    pub fail_upload: bool,
    /// Reject every sideload.
    pub fail_sideload: bool,
    /// File name the server stores primary uploads under.
    pub server_file_name: Option<String>,
    /// Placeholder poster the server reports for videos.
    pub server_poster: Option<String>,
    pub uploads: Mutex<Vec<Upload>>,
    pub updates: Mutex<Vec<(u64, Value)>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            missing_image_sizes: Vec::new(),
            remote_files: HashMap::new(),
            fail_upload: false,
            fail_sideload: false,
            server_file_name: None,
            server_poster: None,
            uploads: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn with_remote_file(mut self, url: &str, file: MediaFile) -> Self {
        self.remote_files.insert(url.to_string(), file);
        self
    }

    pub fn primary_uploads(&self) -> Vec<Upload> {
        self.uploads
            .lock()
            .iter()
            .filter(|u| u.parent.is_none())
            .cloned()
            .collect()
    }

    pub fn sideloads(&self) -> Vec<Upload> {
        self.uploads
            .lock()
            .iter()
            .filter(|u| u.parent.is_some())
            .cloned()
            .collect()
    }

    fn record(&self, file: &MediaFile, data: &AdditionalData, parent: Option<u64>) -> Attachment {
        self.uploads.lock().push(Upload {
            name: file.name().to_string(),
            mime_type: file.mime_type().to_string(),
            data: data.clone(),
            parent,
        });
        let id = match parent {
            Some(parent) => parent,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        if parent.is_some() {
            return Attachment {
                id: Some(id),
                url: Some(format!("https://example.com/uploads/{}", file.name())),
                ..Default::default()
            };
        }

        let file_name = self
            .server_file_name
            .clone()
            .unwrap_or_else(|| file.name().to_string());
        let poster = self
            .server_poster
            .clone()
            .filter(|_| file.mime_type().starts_with("video/"));
        Attachment {
            id: Some(id),
            url: Some(format!("https://example.com/uploads/{file_name}")),
            mime_type: Some(file.mime_type().to_string()),
            file_name: Some(file_name),
            poster,
            missing_image_sizes: self.missing_image_sizes.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn upload_to_server(
        &self,
        file: &MediaFile,
        data: &AdditionalData,
        _cancel: &CancellationToken,
    ) -> upload_media::Result<Attachment> {
        if self.fail_upload {
            return Err(upload_media::Error::transport("Upload failed: 500"));
        }
        Ok(self.record(file, data, None))
    }

    async fn sideload_to_server(
        &self,
        file: &MediaFile,
        attachment_id: u64,
        data: &AdditionalData,
        _cancel: &CancellationToken,
    ) -> upload_media::Result<Attachment> {
        if self.fail_sideload {
            return Err(upload_media::Error::transport("Sideload failed: 500"));
        }
        Ok(self.record(file, data, Some(attachment_id)))
    }

    async fn update_media_item(&self, id: u64, data: Value) -> upload_media::Result<Attachment> {
        self.updates.lock().push((id, data));
        Ok(Attachment {
            id: Some(id),
            ..Default::default()
        })
    }

    async fn fetch_remote_file(
        &self,
        url: &str,
        _name: Option<&str>,
    ) -> upload_media::Result<MediaFile> {
        self.remote_files
            .get(url)
            .cloned()
            .ok_or_else(|| upload_media::Error::transport(format!("Fetching {url} failed: 404")))
    }
}

pub struct Harness {
    pub queue: UploadQueue,
    pub transport: Arc<FakeTransport>,
    pub image: Arc<FakeImage>,
    pub media: Arc<FakeMedia>,
    pub pdf: Arc<FakePdf>,
}

impl Harness {
    pub fn new(prefs: UploadPreferences) -> Self {
        Self::with(prefs, FakeTransport::default(), FakeMedia::default(), QueueConfig::default())
    }

    pub fn with(
        prefs: UploadPreferences,
        transport: FakeTransport,
        media: FakeMedia,
        config: QueueConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let image = Arc::new(FakeImage::default());
        let media = Arc::new(media);
        let pdf = Arc::new(FakePdf::default());
        let engines = Engines {
            vips: image.clone(),
            media: media.clone(),
            pdf: pdf.clone(),
            ..Default::default()
        };
        let queue = UploadQueue::builder()
            .with_transport(transport.clone())
            .with_preferences(Arc::new(PreferenceStore::new(prefs)))
            .with_engines(engines)
            .with_config(config)
            .build()
            .unwrap();
        Self {
            queue,
            transport,
            image,
            media,
            pdf,
        }
    }
}

/// Collect notifications up to and including the first success or failure.
pub async fn until_done(rx: &mut UnboundedReceiver<UploadNotification>) -> Vec<UploadNotification> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(notification) = rx.recv().await {
            let done = matches!(
                notification,
                UploadNotification::Succeeded(_) | UploadNotification::Failed(_)
            );
            seen.push(notification);
            if done {
                break;
            }
        }
    })
    .await
    .expect("item did not finish in time");
    seen
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

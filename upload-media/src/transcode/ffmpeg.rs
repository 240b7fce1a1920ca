//! [`MediaEngine`] backed by the `ffmpeg`/`ffprobe` binaries.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use media_utils::{MediaFile, MediaType, extension_from_mime_type, file_basename};
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use super::engines::{EngineResult, MediaEngine};
use crate::blob::{BlobRegistry, is_blob_url};
use crate::error::EngineError;

const VIDEO_CODECS: &[(&str, &str)] = &[
    ("video/mp4", "libx264"),
    ("video/ogg", "libtheora"),
    ("video/webm", "libvpx-vp9"),
];

const AUDIO_CODECS: &[(&str, &str)] = &[("audio/mp3", "libmp3lame"), ("audio/ogg", "libvorbis")];

// Reduce to 24fps.
const FPS: [&str; 2] = ["-r", "24"];
// Move the index to the front of the file.
const FASTSTART: [&str; 2] = ["-movflags", "+faststart"];
const COLOR_PROFILE: [&str; 2] = ["-pix_fmt", "yuv420p"];
// 'veryfast' has been seen to crash.
const PRESET: [&str; 2] = ["-preset", "fast"];
// Input option: seeking before -i is cheap.
const SEEK_TO_START: [&str; 2] = ["-ss", "00:00:01.000"];
const SINGLE_FRAME: [&str; 2] = ["-frames:v", "1"];

fn video_codec(mime_type: &str) -> &'static str {
    VIDEO_CODECS
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, codec)| *codec)
        .unwrap_or("libx264")
}

fn audio_codec(mime_type: &str) -> &'static str {
    AUDIO_CODECS
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, codec)| *codec)
        .unwrap_or("libmp3lame")
}

/// Keep the video within `threshold` and pad odd dimensions, which encoders reject.
fn scale_args(threshold: u32) -> Vec<String> {
    if threshold == 0 {
        return Vec::new();
    }
    vec![
        "-vf".to_string(),
        format!(
            "scale='min({threshold},iw)':'min({threshold},ih)':force_original_aspect_ratio=decrease,pad='width=ceil(iw/2)*2:height=ceil(ih/2)*2'"
        ),
    ]
}

/// Media engine running ffmpeg processes on scratch copies of the input.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: String,
    ffprobe_path: String,
    /// Resolves `blob:` URLs handed to the URL based operations.
    blobs: Option<Arc<BlobRegistry>>,
}

impl FfmpegEngine {
    /// Binaries from `FFMPEG_PATH`/`FFPROBE_PATH`, else from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            blobs: None,
        }
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_ffprobe_path(mut self, path: impl Into<String>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    pub fn with_blob_registry(mut self, blobs: Arc<BlobRegistry>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Video transcode arguments, without input and output.
    fn video_args(mime_type: &str, threshold: u32) -> Vec<String> {
        let mut args = vec!["-codec:v".to_string(), video_codec(mime_type).to_string()];
        args.extend(scale_args(threshold));
        for pair in [FPS, FASTSTART, COLOR_PROFILE, PRESET] {
            args.extend(pair.iter().map(|s| s.to_string()));
        }
        args
    }

    fn scratch_dir() -> EngineResult<tempfile::TempDir> {
        Ok(tempfile::Builder::new().prefix("upload-media-").tempdir()?)
    }

    async fn stage_file(dir: &Path, file: &MediaFile) -> EngineResult<PathBuf> {
        let ext = extension_from_mime_type(file.mime_type()).unwrap_or("bin");
        let path = dir.join(format!("input.{ext}"));
        tokio::fs::write(&path, file.data()).await?;
        Ok(path)
    }

    /// Path or URL ffmpeg can read for `url`.
    async fn stage_url(&self, dir: &Path, url: &str) -> EngineResult<String> {
        if !is_blob_url(url) {
            return Ok(url.to_string());
        }
        let file = self
            .blobs
            .as_ref()
            .and_then(|blobs| blobs.resolve(url))
            .ok_or_else(|| EngineError::Unsupported(format!("unknown preview URL {url}")))?;
        let path = Self::stage_file(dir, &file).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn run(&self, args: &[String]) -> EngineResult<()> {
        let start = Instant::now();
        let child = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner"])
            .args(args)
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A cancelled step drops this future; the process must go with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::failed(format!("Failed to spawn ffmpeg: {e}")))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::failed(format!("Failed to wait for ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("ffmpeg failed: {}", stderr);
            return Err(EngineError::failed(format!(
                "ffmpeg failed with exit code: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ffmpeg finished"
        );
        Ok(())
    }

    /// Run ffmpeg on `file` and read back the output as `name`/`mime_type`.
    async fn transform(
        &self,
        file: &MediaFile,
        leading: &[&str],
        args: Vec<String>,
        name: String,
        mime_type: &str,
    ) -> EngineResult<MediaFile> {
        let dir = Self::scratch_dir()?;
        let input = Self::stage_file(dir.path(), file).await?;
        let ext = extension_from_mime_type(mime_type).unwrap_or("bin");
        let output = dir.path().join(format!("output.{ext}"));

        let mut full: Vec<String> = leading.iter().map(|s| s.to_string()).collect();
        full.push("-i".to_string());
        full.push(input.to_string_lossy().into_owned());
        full.extend(args);
        full.push(output.to_string_lossy().into_owned());

        self.run(&full).await?;

        let data = tokio::fs::read(&output).await?;
        Ok(MediaFile::new(name, mime_type, data))
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn output_name(file: &MediaFile, mime_type: &str) -> String {
    match extension_from_mime_type(mime_type) {
        Some(ext) => format!("{}.{ext}", file.basename()),
        None => file.name().to_string(),
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    fn can_transcode(&self, file: &MediaFile) -> bool {
        match file.media_type() {
            MediaType::Video | MediaType::Audio => true,
            MediaType::Image => file.mime_type() == "image/gif",
            _ => false,
        }
    }

    #[instrument(skip(self, file), fields(file = %file.name()))]
    async fn transcode_video(
        &self,
        file: &MediaFile,
        mime_type: &str,
        threshold: u32,
    ) -> EngineResult<MediaFile> {
        info!("Transcoding video");
        self.transform(
            file,
            &[],
            Self::video_args(mime_type, threshold),
            output_name(file, mime_type),
            mime_type,
        )
        .await
    }

    #[instrument(skip(self, file), fields(file = %file.name()))]
    async fn transcode_audio(&self, file: &MediaFile, mime_type: &str) -> EngineResult<MediaFile> {
        info!("Transcoding audio");
        let args = vec![
            // Drop any cover art stream.
            "-vn".to_string(),
            "-codec:a".to_string(),
            audio_codec(mime_type).to_string(),
        ];
        self.transform(file, &[], args, output_name(file, mime_type), mime_type)
            .await
    }

    #[instrument(skip(self, file), fields(file = %file.name()))]
    async fn mute_video(&self, file: &MediaFile) -> EngineResult<MediaFile> {
        info!("Muting video");
        let args = vec!["-c".to_string(), "copy".to_string(), "-an".to_string()];
        self.transform(
            file,
            &[],
            args,
            file.name().to_string(),
            file.mime_type(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn poster_from_video(&self, url: &str, basename: &str) -> EngineResult<MediaFile> {
        let dir = Self::scratch_dir()?;
        let input = self.stage_url(dir.path(), url).await?;
        let output = dir.path().join("poster.jpeg");

        let mut args: Vec<String> = SEEK_TO_START.iter().map(|s| s.to_string()).collect();
        args.extend(["-i".to_string(), input]);
        args.extend(SINGLE_FRAME.iter().map(|s| s.to_string()));
        args.push(output.to_string_lossy().into_owned());

        self.run(&args).await?;

        let data = tokio::fs::read(&output).await?;
        Ok(MediaFile::new(
            format!("{}.jpeg", file_basename(basename)),
            "image/jpeg",
            data,
        ))
    }

    #[instrument(skip(self))]
    async fn video_has_audio(&self, url: &str) -> EngineResult<bool> {
        let dir = Self::scratch_dir()?;
        let input = self.stage_url(dir.path(), url).await?;

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "a:0",
                "-show_entries",
                "stream=codec_type",
                "-of",
                "csv=p=0",
                input.as_str(),
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::failed(format!("Failed to run ffprobe: {e}")))?;

        // No output from a failed probe says nothing about the audio track.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::failed(format!(
                "ffprobe failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim() == "audio")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_codec_table() {
        assert_eq!(video_codec("video/mp4"), "libx264");
        assert_eq!(video_codec("video/ogg"), "libtheora");
        assert_eq!(video_codec("video/webm"), "libvpx-vp9");
        assert_eq!(video_codec("video/quicktime"), "libx264");
        assert_eq!(audio_codec("audio/ogg"), "libvorbis");
        assert_eq!(audio_codec("audio/mp3"), "libmp3lame");
    }

    #[test]
    fn test_video_args() {
        let args = FfmpegEngine::video_args("video/webm", 1920);
        assert_eq!(args[..2], ["-codec:v", "libvpx-vp9"]);
        assert!(args.iter().any(|a| a.starts_with("scale='min(1920,iw)'")));
        assert!(args.windows(2).any(|w| w == ["-r", "24"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "fast"]));

        let unscaled = FfmpegEngine::video_args("video/mp4", 0);
        assert!(!unscaled.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_output_name() {
        let file = MediaFile::new("clip.mov", "video/quicktime", vec![0u8]);
        assert_eq!(output_name(&file, "video/mp4"), "clip.mp4");
        assert_eq!(output_name(&file, "audio/mp3"), "clip.mp3");
    }

    #[test]
    fn test_can_transcode() {
        let engine = FfmpegEngine::new();
        assert!(engine.can_transcode(&MediaFile::new("a.gif", "image/gif", vec![0u8])));
        assert!(engine.can_transcode(&MediaFile::new("a.mp4", "video/mp4", vec![0u8])));
        assert!(!engine.can_transcode(&MediaFile::new("a.png", "image/png", vec![0u8])));
        assert!(!engine.can_transcode(&MediaFile::new("a.pdf", "application/pdf", vec![0u8])));
    }

    #[tokio::test]
    async fn test_unknown_blob_url_is_rejected() {
        let engine = FfmpegEngine::new().with_blob_registry(Arc::new(BlobRegistry::new()));
        let dir = FfmpegEngine::scratch_dir().unwrap();
        let err = engine.stage_url(dir.path(), "blob:missing").await.unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));

        let remote = engine
            .stage_url(dir.path(), "https://example.com/a.mp4")
            .await
            .unwrap();
        assert_eq!(remote, "https://example.com/a.mp4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_probe_is_an_error() {
        let engine = FfmpegEngine::new().with_ffprobe_path("/bin/false");
        let result = engine.video_has_audio("/nonexistent/clip.mp4").await;
        assert!(
            matches!(result, Err(EngineError::Failed(_))),
            "got {result:?}"
        );
    }

    /// Shell script standing in for ffmpeg.
    #[cfg(unix)]
    fn fake_binary(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_transcode_kills_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let binary = fake_binary(
            dir.path(),
            &format!("sleep 1\ntouch '{}'", marker.display()),
        );
        let engine = FfmpegEngine::new().with_ffmpeg_path(binary.to_string_lossy());
        let file = MediaFile::new("clip.mov", "video/quicktime", vec![0u8; 8]);

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            engine.transcode_video(&file, "video/mp4", 0),
        )
        .await;
        assert!(result.is_err(), "fake ffmpeg finished early");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "ffmpeg kept running after the step was dropped");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_exit_status_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(dir.path(), "exit 3");
        let engine = FfmpegEngine::new().with_ffmpeg_path(binary.to_string_lossy());
        let file = MediaFile::new("clip.mov", "video/quicktime", vec![0u8; 8]);

        let err = engine.mute_video(&file).await.unwrap_err();
        assert!(err.to_string().contains("exit code: 3"), "{err}");
    }
}

//! Mapping from a plan step to a concrete operation.
//!
//! [`select_operation`] is pure: it only looks at the item and the
//! preferences snapshot. Running the operation is [`execute`].

use std::time::Instant;

use media_utils::{MediaFile, extension_from_mime_type};
use serde_json::Value;
use tracing::debug;

use super::engines::{EngineResult, Engines};
use crate::config::{ImageLibrary, ThumbnailGeneration, UploadPreferences};
use crate::error::{ErrorCode, UploadError};
use crate::queue::{AdditionalData, ImageSizeCrop, QueueItem, TranscodingType};

/// How an image optimization encodes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEncode {
    /// Same format, lower quality.
    Compress,
    Convert { mime_type: String },
}

/// Fully resolved transcode step.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOperation {
    /// Finish the step with the file unchanged.
    Passthrough,
    ResizeCrop {
        size: ImageSizeCrop,
        library: ImageLibrary,
        smart_crop: bool,
        add_suffix: bool,
    },
    ConvertHeif,
    ConvertGif {
        mime_type: &'static str,
        threshold: u32,
    },
    TranscodeVideo {
        mime_type: &'static str,
        threshold: u32,
    },
    TranscodeAudio {
        mime_type: &'static str,
    },
    MuteVideo,
    OptimizeImage {
        encode: ImageEncode,
        library: ImageLibrary,
        quality: u8,
        /// Hold the result for approval instead of finishing.
        require_approval: bool,
    },
}

impl TranscodeOperation {
    /// Code used when the operation fails without a more specific error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TranscodeOperation::Passthrough | TranscodeOperation::OptimizeImage { .. } => {
                ErrorCode::MediaTranscodingError
            }
            TranscodeOperation::ResizeCrop { .. } | TranscodeOperation::ConvertHeif => {
                ErrorCode::ImageTranscodingError
            }
            TranscodeOperation::ConvertGif { .. } | TranscodeOperation::TranscodeVideo { .. } => {
                ErrorCode::VideoTranscodingError
            }
            TranscodeOperation::TranscodeAudio { .. } => ErrorCode::AudioTranscodingError,
            TranscodeOperation::MuteVideo => ErrorCode::VideoMutingError,
        }
    }

    /// Provenance label added to the item when the step finishes.
    pub fn media_source_term(&self) -> Option<&'static str> {
        match self {
            TranscodeOperation::TranscodeVideo { .. }
            | TranscodeOperation::TranscodeAudio { .. }
            | TranscodeOperation::OptimizeImage { .. } => Some("media-optimization"),
            TranscodeOperation::ConvertGif { .. } => Some("gif-conversion"),
            _ => None,
        }
    }

    /// Upload fields implied by the step's result.
    pub fn additional_data(&self) -> AdditionalData {
        let mut data = AdditionalData::new();
        if matches!(self, TranscodeOperation::MuteVideo) {
            data.insert("mexp_is_muted".to_string(), Value::Bool(true));
        }
        data
    }

    pub fn requires_approval(&self) -> bool {
        matches!(
            self,
            TranscodeOperation::OptimizeImage {
                require_approval: true,
                ..
            }
        )
    }
}

/// Resolve plan step `kind` for `item`.
///
/// Fails only for image optimization of a file whose format is unknown.
pub fn select_operation(
    kind: TranscodingType,
    item: &QueueItem,
    preferences: &UploadPreferences,
) -> Result<TranscodeOperation, UploadError> {
    let operation = match kind {
        TranscodingType::ResizeCrop => match &item.resize {
            None => TranscodeOperation::Passthrough,
            Some(size) => TranscodeOperation::ResizeCrop {
                size: size.clone(),
                library: preferences.image_library,
                smart_crop: preferences.thumbnail_generation == ThumbnailGeneration::Smart,
                add_suffix: item.is_sideload,
            },
        },
        TranscodingType::Heif => TranscodeOperation::ConvertHeif,
        TranscodingType::Gif => TranscodeOperation::ConvertGif {
            mime_type: preferences.video_output_format.mime_type(),
            threshold: preferences.big_video_size_threshold,
        },
        TranscodingType::Video => TranscodeOperation::TranscodeVideo {
            mime_type: preferences.video_output_format.mime_type(),
            threshold: preferences.big_video_size_threshold,
        },
        TranscodingType::Audio => TranscodeOperation::TranscodeAudio {
            mime_type: preferences.audio_output_format.mime_type(),
        },
        TranscodingType::MuteVideo => TranscodeOperation::MuteVideo,
        TranscodingType::Image => select_image_operation(item, preferences, false)?,
        TranscodingType::OptimizeExisting => {
            select_image_operation(item, preferences, preferences.require_approval)?
        }
    };
    Ok(operation)
}

fn select_image_operation(
    item: &QueueItem,
    preferences: &UploadPreferences,
    require_approval: bool,
) -> Result<TranscodeOperation, UploadError> {
    let input_format = extension_from_mime_type(item.file.mime_type()).ok_or_else(|| {
        UploadError::new(
            ErrorCode::MediaTranscodingError,
            "Unsupported file type",
            item.file.clone(),
        )
    })?;

    let output_format = preferences.output_format_for(input_format);
    let quality = preferences.quality_for(input_format);
    let library = preferences.image_library;

    let (encode, library) = if output_format == input_format {
        (ImageEncode::Compress, library)
    } else {
        let convert = ImageEncode::Convert {
            mime_type: format!("image/{output_format}"),
        };
        match output_format.as_str() {
            "webp" if library == ImageLibrary::Browser && preferences.browser_supports_webp => {
                (convert, ImageLibrary::Browser)
            }
            "webp" | "avif" | "gif" => (convert, ImageLibrary::Vips),
            "jpeg" | "png" => (convert, library),
            _ => (ImageEncode::Compress, library),
        }
    };

    Ok(TranscodeOperation::OptimizeImage {
        encode,
        library,
        quality,
        require_approval,
    })
}

/// Run `operation` on `file`.
pub async fn execute(
    operation: &TranscodeOperation,
    file: &MediaFile,
    engines: &Engines,
) -> EngineResult<MediaFile> {
    let start = Instant::now();

    let output = match operation {
        TranscodeOperation::Passthrough => file.clone(),
        TranscodeOperation::ResizeCrop {
            size,
            library,
            smart_crop,
            add_suffix,
        } => {
            engines
                .image(*library)
                .resize(file, size, *smart_crop, *add_suffix)
                .await?
        }
        TranscodeOperation::ConvertHeif => engines.heif.transcode_heif(file).await?,
        TranscodeOperation::ConvertGif {
            mime_type,
            threshold,
        } => {
            engines
                .media
                .convert_gif_to_video(file, mime_type, *threshold)
                .await?
        }
        TranscodeOperation::TranscodeVideo {
            mime_type,
            threshold,
        } => {
            engines
                .media
                .transcode_video(file, mime_type, *threshold)
                .await?
        }
        TranscodeOperation::TranscodeAudio { mime_type } => {
            engines.media.transcode_audio(file, mime_type).await?
        }
        TranscodeOperation::MuteVideo => engines.media.mute_video(file).await?,
        TranscodeOperation::OptimizeImage {
            encode,
            library,
            quality,
            ..
        } => {
            let engine = engines.image(*library);
            let quality = f32::from(*quality) / 100.0;
            let optimized = match encode {
                ImageEncode::Compress => engine.compress(file, quality).await?,
                ImageEncode::Convert { mime_type } => {
                    engine.convert_format(file, mime_type, quality).await?
                }
            };
            optimized.inherit_dimensions(file)
        }
    };

    debug!(
        file = %file.name(),
        output = %output.name(),
        operation = ?operation,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Transcode step finished"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{ImageFormatPreference, VideoFormat};

    fn item(name: &str, mime: &str) -> QueueItem {
        QueueItem::new(MediaFile::new(name, mime, vec![0u8]))
    }

    fn prefs_with_output(input: &str, output: &str) -> UploadPreferences {
        UploadPreferences {
            image_formats: HashMap::from([(
                input.to_string(),
                ImageFormatPreference {
                    output_format: Some(output.to_string()),
                    quality: None,
                },
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_resize_without_target_is_passthrough() {
        let op = select_operation(
            TranscodingType::ResizeCrop,
            &item("a.jpeg", "image/jpeg"),
            &UploadPreferences::default(),
        )
        .unwrap();
        assert_eq!(op, TranscodeOperation::Passthrough);
    }

    #[test]
    fn test_resize_suffix_follows_sideload() {
        let mut it = item("a.jpeg", "image/jpeg");
        it.resize = Some(ImageSizeCrop::new(150, 150));
        it.is_sideload = true;

        match select_operation(TranscodingType::ResizeCrop, &it, &UploadPreferences::default())
            .unwrap()
        {
            TranscodeOperation::ResizeCrop {
                add_suffix,
                smart_crop,
                ..
            } => {
                assert!(add_suffix);
                assert!(smart_crop);
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_same_format_compresses_with_default_quality() {
        let op = select_operation(
            TranscodingType::Image,
            &item("a.jpeg", "image/jpeg"),
            &UploadPreferences::default(),
        )
        .unwrap();
        assert_eq!(
            op,
            TranscodeOperation::OptimizeImage {
                encode: ImageEncode::Compress,
                library: ImageLibrary::Vips,
                quality: 80,
                require_approval: false,
            }
        );
        assert_eq!(op.media_source_term(), Some("media-optimization"));
    }

    #[test]
    fn test_avif_and_gif_always_use_vips() {
        for output in ["avif", "gif"] {
            let mut prefs = prefs_with_output("png", output);
            prefs.image_library = ImageLibrary::Browser;
            let op = select_operation(TranscodingType::Image, &item("a.png", "image/png"), &prefs)
                .unwrap();
            match op {
                TranscodeOperation::OptimizeImage {
                    encode: ImageEncode::Convert { mime_type },
                    library,
                    ..
                } => {
                    assert_eq!(mime_type, format!("image/{output}"));
                    assert_eq!(library, ImageLibrary::Vips);
                }
                other => panic!("unexpected operation: {other:?}"),
            }
        }
    }

    #[test]
    fn test_webp_falls_back_when_browser_cannot_encode() {
        let mut prefs = prefs_with_output("jpeg", "webp");
        prefs.image_library = ImageLibrary::Browser;

        let op = select_operation(TranscodingType::Image, &item("a.jpeg", "image/jpeg"), &prefs)
            .unwrap();
        assert!(matches!(
            op,
            TranscodeOperation::OptimizeImage {
                library: ImageLibrary::Browser,
                ..
            }
        ));

        prefs.browser_supports_webp = false;
        let op = select_operation(TranscodingType::Image, &item("a.jpeg", "image/jpeg"), &prefs)
            .unwrap();
        assert!(matches!(
            op,
            TranscodeOperation::OptimizeImage {
                library: ImageLibrary::Vips,
                ..
            }
        ));
    }

    #[test]
    fn test_optimize_existing_honours_approval_preference() {
        let it = item("a.jpeg", "image/jpeg");
        let mut prefs = UploadPreferences::default();

        let op = select_operation(TranscodingType::OptimizeExisting, &it, &prefs).unwrap();
        assert!(op.requires_approval());

        prefs.require_approval = false;
        let op = select_operation(TranscodingType::OptimizeExisting, &it, &prefs).unwrap();
        assert!(!op.requires_approval());
    }

    #[test]
    fn test_unknown_image_format_fails() {
        let err = select_operation(
            TranscodingType::Image,
            &item("a.bmp", "image/bmp"),
            &UploadPreferences::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::MediaTranscodingError);
    }

    #[test]
    fn test_video_and_mute_operations() {
        let prefs = UploadPreferences {
            video_output_format: VideoFormat::Webm,
            ..Default::default()
        };
        let it = item("a.mov", "video/quicktime");

        let op = select_operation(TranscodingType::Video, &it, &prefs).unwrap();
        assert_eq!(
            op,
            TranscodeOperation::TranscodeVideo {
                mime_type: "video/webm",
                threshold: 1920
            }
        );
        assert_eq!(op.error_code(), ErrorCode::VideoTranscodingError);

        let gif = select_operation(TranscodingType::Gif, &it, &prefs).unwrap();
        assert_eq!(gif.media_source_term(), Some("gif-conversion"));

        let mute = select_operation(TranscodingType::MuteVideo, &it, &prefs).unwrap();
        assert_eq!(mute.error_code(), ErrorCode::VideoMutingError);
        assert_eq!(mute.additional_data()["mexp_is_muted"], true);
        assert_eq!(mute.media_source_term(), None);
    }
}

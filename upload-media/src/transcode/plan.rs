//! Classification of a freshly added file into a transcode plan.

use media_utils::{MediaFile, MediaType, sniff};

use crate::config::UploadPreferences;
use crate::queue::TranscodingType;

/// Plan for `file` given the current preferences.
///
/// `can_transcode` says whether the media engine accepts the file. Posters
/// for video and PDF are extracted separately; neither changes the plan.
pub fn classify(
    file: &MediaFile,
    preferences: &UploadPreferences,
    can_transcode: bool,
) -> Vec<TranscodingType> {
    match file.media_type() {
        MediaType::Image => {
            let data = file.data();

            if sniff::is_animated_gif(data) && can_transcode && preferences.gif_convert {
                return vec![TranscodingType::Gif];
            }

            let mut plan = Vec::with_capacity(3);
            if is_heif(file) {
                plan.push(TranscodingType::Heif);
            }
            // Enforces the big image size ceiling.
            plan.push(TranscodingType::ResizeCrop);
            if preferences.optimize_on_upload {
                plan.push(TranscodingType::Image);
            }
            plan
        }
        MediaType::Video if can_transcode => vec![TranscodingType::Video],
        MediaType::Audio if can_transcode => vec![TranscodingType::Audio],
        _ => Vec::new(),
    }
}

fn is_heif(file: &MediaFile) -> bool {
    matches!(file.mime_type(), "image/heic" | "image/heif") || sniff::is_heif(file.data())
}

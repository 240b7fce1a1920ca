use serde::{Deserialize, Serialize};

/// Coarse media category derived from a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Pdf,
    Unknown,
}

impl MediaType {
    /// Classify a MIME type. Parameters (`; codecs=...`) are ignored.
    pub fn from_mime_type(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/pdf" {
            return MediaType::Pdf;
        }

        match essence.split_once('/').map(|(top, _)| top) {
            Some("image") => MediaType::Image,
            Some("video") => MediaType::Video,
            Some("audio") => MediaType::Audio,
            _ => MediaType::Unknown,
        }
    }

    /// Whether a still frame can be derived for preview descriptors.
    #[inline]
    pub fn has_still(self) -> bool {
        matches!(self, MediaType::Image | MediaType::Video | MediaType::Pdf)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Pdf => "pdf",
            MediaType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpeg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/ogg", "ogv"),
    ("video/quicktime", "mov"),
    ("audio/mpeg", "mp3"),
    ("audio/mp3", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("audio/aac", "aac"),
    ("application/pdf", "pdf"),
    ("text/vtt", "vtt"),
];

/// Canonical file extension for a MIME type, without the leading dot.
pub fn extension_from_mime_type(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next()?.trim();
    MIME_EXTENSIONS
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
}

/// Reverse lookup of [`extension_from_mime_type`]; also accepts common aliases.
pub fn mime_type_from_extension(extension: &str) -> Option<&'static str> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    let ext = match ext.as_str() {
        "jpg" | "jpe" => "jpeg",
        "m4v" => "mp4",
        other => other,
    };
    MIME_EXTENSIONS
        .iter()
        .find(|(_, candidate)| *candidate == ext)
        .map(|(mime, _)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_classification() {
        assert_eq!(MediaType::from_mime_type("image/jpeg"), MediaType::Image);
        assert_eq!(MediaType::from_mime_type("video/mp4"), MediaType::Video);
        assert_eq!(MediaType::from_mime_type("audio/ogg"), MediaType::Audio);
        assert_eq!(MediaType::from_mime_type("application/pdf"), MediaType::Pdf);
        assert_eq!(MediaType::from_mime_type("text/xml"), MediaType::Unknown);
        assert_eq!(MediaType::from_mime_type(""), MediaType::Unknown);
    }

    #[test]
    fn test_media_type_ignores_parameters_and_case() {
        assert_eq!(
            MediaType::from_mime_type("Video/WebM; codecs=vp9"),
            MediaType::Video
        );
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(extension_from_mime_type("image/jpeg"), Some("jpeg"));
        assert_eq!(extension_from_mime_type("audio/mp3"), Some("mp3"));
        assert_eq!(extension_from_mime_type("application/zip"), None);
        assert_eq!(mime_type_from_extension("JPG"), Some("image/jpeg"));
        assert_eq!(mime_type_from_extension(".pdf"), Some("application/pdf"));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&MediaType::Pdf).unwrap();
        assert_eq!(json, "\"pdf\"");
    }
}

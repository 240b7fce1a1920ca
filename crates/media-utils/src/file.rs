use bytes::Bytes;

use crate::filename::file_basename;
use crate::mime::MediaType;

/// Pixel dimensions of an image after a resize, together with the
/// dimensions it had before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ImageDimensions {
    #[inline]
    pub fn new(width: u32, height: u32, original_width: u32, original_height: u32) -> Self {
        Self {
            width,
            height,
            original_width,
            original_height,
        }
    }

    /// Dimensions of an image that was never scaled.
    #[inline]
    pub fn unscaled(width: u32, height: u32) -> Self {
        Self::new(width, height, width, height)
    }

    #[inline]
    pub fn was_resized(&self) -> bool {
        self.width != self.original_width || self.height != self.original_height
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An in-memory file travelling through the pipeline.
///
/// Cloning is cheap: the payload is reference counted, so keeping an
/// untouched `source_file` next to the working file costs nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    name: String,
    mime_type: String,
    data: Bytes,
    dimensions: Option<ImageDimensions>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
            dimensions: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn dimensions(&self) -> Option<ImageDimensions> {
        self.dimensions
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime_type(&self.mime_type)
    }

    /// File name without its extension.
    pub fn basename(&self) -> &str {
        file_basename(&self.name)
    }

    /// Whether the image was scaled away from its original dimensions.
    pub fn was_resized(&self) -> bool {
        self.dimensions.is_some_and(|d| d.was_resized())
    }

    /// Same payload under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_dimensions(mut self, dimensions: ImageDimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Carry over dimensions from the file this one was derived from.
    pub fn inherit_dimensions(mut self, from: &MediaFile) -> Self {
        if self.dimensions.is_none() {
            self.dimensions = from.dimensions;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_display() {
        let d = ImageDimensions::new(640, 480, 1920, 1440);
        assert_eq!(d.to_string(), "640x480");
        assert!(d.was_resized());
        assert!(!ImageDimensions::unscaled(10, 10).was_resized());
    }

    #[test]
    fn test_renamed_keeps_payload() {
        let file = MediaFile::new("photo.jpeg", "image/jpeg", vec![1u8, 2, 3])
            .with_dimensions(ImageDimensions::new(1, 1, 2, 2));
        let renamed = file.renamed("photo-original.jpeg");

        assert_eq!(renamed.name(), "photo-original.jpeg");
        assert_eq!(renamed.data(), file.data());
        assert!(renamed.was_resized());
        assert_eq!(renamed.basename(), "photo-original");
    }

    #[test]
    fn test_media_type_from_file() {
        let file = MediaFile::new("clip.mp4", "video/mp4", Bytes::new());
        assert_eq!(file.media_type(), MediaType::Video);
        assert_eq!(file.size(), 0);
        assert!(!file.was_resized());
    }
}

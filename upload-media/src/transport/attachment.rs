//! Media endpoint response shape and its normalization.

use serde::Deserialize;

use crate::queue::Attachment;

#[derive(Debug, Default, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub raw: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmbeddedMedia {
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Embedded {
    #[serde(rename = "wp:featuredmedia", default)]
    pub featured_media: Vec<EmbeddedMedia>,
}

/// Attachment as returned by the media endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RestAttachment {
    pub id: u64,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub title: Option<Rendered>,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub caption: Option<Rendered>,
    #[serde(default)]
    pub mexp_blurhash: Option<String>,
    #[serde(default)]
    pub mexp_dominant_color: Option<String>,
    #[serde(default)]
    pub mexp_filename: Option<String>,
    #[serde(default)]
    pub featured_media: Option<u64>,
    #[serde(default)]
    pub missing_image_sizes: Vec<String>,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<Embedded>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl From<RestAttachment> for Attachment {
    fn from(rest: RestAttachment) -> Self {
        let poster = rest
            .embedded
            .and_then(|e| e.featured_media.into_iter().next())
            .and_then(|m| non_empty(m.source_url));

        Attachment {
            id: Some(rest.id),
            url: non_empty(rest.source_url),
            mime_type: non_empty(rest.mime_type),
            file_name: non_empty(rest.mexp_filename),
            poster,
            poster_id: rest.featured_media.filter(|id| *id != 0),
            image: None,
            title: rest.title.and_then(|t| non_empty(t.raw)),
            alt: non_empty(rest.alt_text),
            caption: rest.caption.and_then(|c| non_empty(c.raw)),
            blur_hash: non_empty(rest.mexp_blurhash),
            dominant_color: non_empty(rest.mexp_dominant_color),
            missing_image_sizes: rest.missing_image_sizes,
        }
    }
}

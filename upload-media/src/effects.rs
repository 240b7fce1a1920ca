//! Best-effort metadata collected right before an upload.
//!
//! Nothing in here fails the upload: every probe error is logged and
//! dropped.

use media_utils::MediaType;
use serde_json::Value;
use tracing::debug;

use crate::blob::BlobRegistry;
use crate::queue::{AdditionalData, QueueItem};
use crate::transcode::Engines;

/// Collaborators the probes need.
pub(crate) struct EffectContext<'a> {
    pub engines: &'a Engines,
    pub blobs: &'a BlobRegistry,
    /// Transparency detection needs an isolated execution context.
    pub isolated_context: bool,
}

fn is_unset(data: &AdditionalData, key: &str) -> bool {
    data.get(key).is_none_or(Value::is_null)
}

/// Fill `mexp_is_muted`, `mexp_dominant_color`, `mexp_has_transparency` and
/// `mexp_blurhash` in `data` where they are still unknown.
pub(crate) async fn collect_side_effects(
    item: &QueueItem,
    data: &mut AdditionalData,
    ctx: &EffectContext<'_>,
) {
    let media_type = item.file.media_type();
    if !media_type.has_still() {
        return;
    }

    let mut still_url = if matches!(media_type, MediaType::Video | MediaType::Pdf) {
        item.attachment.poster.clone()
    } else {
        item.attachment.url.clone()
    };

    // Freshly converted GIF: preview the source image instead.
    let mut owned_url = None;
    if still_url.is_none()
        && media_type == MediaType::Video
        && item.source_file.media_type() == MediaType::Image
    {
        let url = ctx.blobs.create(&item.source_file);
        owned_url = Some(url.clone());
        still_url = Some(url);
    }

    if media_type == MediaType::Video
        && is_unset(data, "mexp_is_muted")
        && let Some(url) = item.attachment.url.as_deref()
    {
        match ctx.engines.media.video_has_audio(url).await {
            Ok(has_audio) => {
                data.insert("mexp_is_muted".to_string(), Value::Bool(!has_audio));
            }
            Err(e) => debug!(item_id = %item.id, error = %e, "Audio probe failed"),
        }
    }

    if let Some(url) = still_url.as_deref() {
        if is_unset(data, "mexp_dominant_color") {
            match ctx.engines.analysis.dominant_color(url).await {
                Ok(color) => {
                    data.insert("mexp_dominant_color".to_string(), Value::String(color));
                }
                Err(e) => debug!(item_id = %item.id, error = %e, "Dominant color failed"),
            }
        }

        if media_type == MediaType::Image && ctx.isolated_context {
            match ctx.engines.vips.has_transparency(url).await {
                Ok(transparent) => {
                    data.insert(
                        "mexp_has_transparency".to_string(),
                        Value::Bool(transparent),
                    );
                }
                Err(e) => debug!(item_id = %item.id, error = %e, "Transparency check failed"),
            }
        }

        if is_unset(data, "mexp_blurhash") {
            match ctx.engines.analysis.blurhash(url).await {
                Ok(hash) => {
                    data.insert("mexp_blurhash".to_string(), Value::String(hash));
                }
                Err(e) => debug!(item_id = %item.id, error = %e, "Blurhash failed"),
            }
        }
    }

    // Previews owned by the item stay; only the one made here is released.
    if let Some(url) = owned_url {
        ctx.blobs.revoke(&url);
    }
}

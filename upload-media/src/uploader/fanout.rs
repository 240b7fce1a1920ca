//! Child uploads spawned once a primary upload finished.

use media_utils::{MediaType, file_basename};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::args::{AddItemArgs, AddSideloadItemArgs};
use super::{UploadQueue, sideload_item};
use crate::blob::is_blob_url;
use crate::config::ThumbnailGeneration;
use crate::notification::{UploadListener, UploadNotification};
use crate::queue::{
    AdditionalData, Attachment, AttachmentImage, BatchId, QueueItem, TranscodingType,
};

impl UploadQueue {
    /// Queue the poster, missing image sizes and the unscaled original of
    /// `item`. Never fails the parent.
    pub(super) async fn fan_out(&self, item: &QueueItem) {
        let attachment = &item.attachment;
        let Some(attachment_id) = attachment.id else {
            return;
        };
        let media_type = attachment
            .mime_type
            .as_deref()
            .map(MediaType::from_mime_type)
            .unwrap_or_else(|| item.file.media_type());
        let prefs = self.inner.preferences.snapshot();

        if media_type == MediaType::Video
            && item.generated_poster_id.is_none()
            && attachment.poster_id.is_none()
        {
            self.upload_poster(item).await;
        }

        if !attachment.missing_image_sizes.is_empty()
            && prefs.thumbnail_generation != ThumbnailGeneration::Server
        {
            self.upload_missing_sizes(item, attachment_id, media_type);
        }

        if media_type == MediaType::Image && item.file.was_resized() && prefs.keep_original {
            self.upload_original(item, attachment_id);
        }
    }

    async fn upload_poster(&self, item: &QueueItem) {
        let poster = match &item.poster {
            Some(poster) => poster.clone(),
            None => {
                let Some(url) = item.attachment.url.as_deref() else {
                    return;
                };
                let basename = format!("{}-poster", item.file.basename());
                match self.inner.engines.media.poster_from_video(url, &basename).await {
                    Ok(poster) => poster,
                    Err(e) => {
                        debug!(item_id = %item.id, error = %e, "No poster for uploaded video");
                        return;
                    }
                }
            }
        };

        let mut additional_data = AdditionalData::new();
        if let Some(post) = item.additional_data.get("post") {
            additional_data.insert("post".to_string(), post.clone());
        }

        let id = self.add_item(AddItemArgs {
            additional_data,
            media_source_terms: vec!["poster-generation".to_string()],
            blur_hash: item.blur_hash.clone(),
            dominant_color: item.dominant_color.clone(),
            listener: Some(self.forward_poster(item)),
            ..AddItemArgs::new(poster)
        });
        info!(item_id = %item.id, poster_item_id = %id, "Queued poster upload");
    }

    fn upload_missing_sizes(&self, item: &QueueItem, attachment_id: u64, media_type: MediaType) {
        let attachment = &item.attachment;
        let state = self.inner.store.snapshot();
        let batch_id = BatchId::new();
        let base_data = self.child_data(item, attachment_id);

        let mut file = item.file.clone();
        if let Some(name) = &attachment.file_name {
            file = file.renamed(name.clone());
        }

        let mut children = Vec::new();
        if media_type == MediaType::Pdf
            && let Some(poster) = &item.poster
        {
            file = poster.clone();
            let mut additional_data = base_data.clone();
            additional_data.insert("image_size".to_string(), Value::from("full"));
            children.push(sideload_item(AddSideloadItemArgs {
                batch_id: Some(batch_id),
                additional_data,
                transcode: Some(vec![TranscodingType::Image]),
                ..AddSideloadItemArgs::new(file.clone(), attachment_id)
            }));
        }

        for name in &attachment.missing_image_sizes {
            let Some(mut size) = state.get_image_size(name) else {
                debug!(image_size = %name, "Unknown image size");
                continue;
            };
            if media_type == MediaType::Pdf && name == "thumbnail" {
                size.crop = false;
            }
            size.name = Some(name.clone());

            children.push(sideload_item(AddSideloadItemArgs {
                batch_id: Some(batch_id),
                additional_data: base_data.clone(),
                resize: Some(size),
                transcode: Some(vec![TranscodingType::ResizeCrop]),
                ..AddSideloadItemArgs::new(file.clone(), attachment_id)
            }));
        }

        info!(
            item_id = %item.id,
            attachment_id,
            count = children.len(),
            "Queued missing image sizes"
        );
        self.enqueue(children);
    }

    fn upload_original(&self, item: &QueueItem, attachment_id: u64) {
        let source = &item.source_file;
        let name = original_file_name(
            item.attachment
                .file_name
                .as_deref()
                .unwrap_or(source.name()),
        );

        let mut additional_data = self.child_data(item, attachment_id);
        additional_data.insert("image_size".to_string(), Value::from("original"));

        let id = self.add_sideload_item(AddSideloadItemArgs {
            additional_data,
            transcode: Some(Vec::new()),
            ..AddSideloadItemArgs::new(source.renamed(name), attachment_id)
        });
        info!(item_id = %item.id, original_item_id = %id, "Queued original image");
    }

    /// `post` plus the parent's `upload_request`, if any.
    fn child_data(&self, item: &QueueItem, attachment_id: u64) -> AdditionalData {
        let mut data = AdditionalData::new();
        data.insert("post".to_string(), Value::from(attachment_id));
        if let Some(request) = item.additional_data.get("upload_request") {
            data.insert("upload_request".to_string(), request.clone());
        }
        data
    }

    /// Listener for a poster child: shows the poster on the parent and links
    /// the two attachments once it is uploaded.
    fn forward_poster(&self, parent: &QueueItem) -> UploadListener {
        let (listener, mut rx) = UploadListener::channel();
        let parent_listener = parent.listener.clone();
        let parent_attachment = parent.attachment.clone();
        let transport = self.inner.transport.clone();

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notification {
                    UploadNotification::Changed(poster) => {
                        if let (Some(url), Some(listener)) = (poster.url, &parent_listener)
                            && !is_blob_url(&url)
                        {
                            listener.notify(UploadNotification::Changed(Attachment {
                                image: Some(AttachmentImage { src: url }),
                                ..parent_attachment.clone()
                            }));
                        }
                    }
                    UploadNotification::Succeeded(poster) => {
                        let (Some(parent_id), Some(poster_id)) = (parent_attachment.id, poster.id)
                        else {
                            continue;
                        };
                        let update = json!({
                            "featured_media": poster_id,
                            "meta": { "mexp_generated_poster_id": poster_id },
                        });
                        if let Err(e) = transport.update_media_item(parent_id, update).await {
                            warn!(parent_id, poster_id, error = %e, "Failed to link poster");
                        }
                    }
                    UploadNotification::Failed(_) | UploadNotification::BatchSucceeded(_) => {}
                }
            }
        });

        listener
    }

    /// Listener for an optimized copy: relays everything to `listener` and
    /// records the copy on the original attachment.
    pub(super) fn link_optimized(
        &self,
        original_id: u64,
        listener: Option<UploadListener>,
    ) -> UploadListener {
        let (forward, mut rx) = UploadListener::channel();
        let transport = self.inner.transport.clone();

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let UploadNotification::Succeeded(optimized) = &notification
                    && let Some(optimized_id) = optimized.id
                {
                    let update = json!({ "meta": { "mexp_optimized_id": optimized_id } });
                    if let Err(e) = transport.update_media_item(original_id, update).await {
                        warn!(original_id, optimized_id, error = %e, "Failed to link optimized copy");
                    }
                }
                if let Some(listener) = &listener {
                    listener.notify(notification);
                }
            }
        });

        forward
    }
}

/// `photo-1.jpg` becomes `photo-1-original.jpg`: the server's name and
/// extension are kept.
fn original_file_name(name: &str) -> String {
    let base = file_basename(name);
    name.replacen(base, &format!("{base}-original"), 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_file_name() {
        assert_eq!(original_file_name("photo.jpeg"), "photo-original.jpeg");
        assert_eq!(original_file_name("photo-1.jpg"), "photo-1-original.jpg");
        assert_eq!(original_file_name("scan"), "scan-original");
        assert_eq!(original_file_name("a.b.png"), "a.b-original.png");
    }
}

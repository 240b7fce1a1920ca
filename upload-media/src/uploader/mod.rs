//! The upload queue: entry points and the per-item drivers behind them.
//!
//! Every queued item is driven by its own task. Drivers only touch the queue
//! through [`QueueStore::dispatch`], and the heavy transcode steps of all
//! drivers share one [`TranscodeThrottle`] slot.

mod args;
mod driver;
mod fanout;

use std::collections::HashMap;
use std::sync::Arc;

use media_utils::{MediaFile, file_name_from_url, with_basename_suffix};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{BlobRegistry, is_blob_url};
use crate::config::{PreferenceStore, QueueConfig, ThumbnailGeneration, UploadPreferences};
use crate::error::UploadError;
use crate::notification::{UploadListener, UploadNotification};
use crate::queue::{
    Action, AdditionalData, Attachment, BatchId, BatchTracker, ImageSizeCrop, QueueEvent,
    QueueItem, QueueItemId, QueueStore, State, TranscodingType, merge_additional_data,
};
use crate::transcode::{Engines, FfmpegEngine, TranscodeThrottle};
use crate::transport::MediaTransport;
use crate::validation::validate_file;
use crate::{Error, Result};

pub use args::{AddItemArgs, AddSideloadItemArgs, ExistingItemArgs, UploadMediaArgs};

/// Control handles of a running driver.
struct ItemHandle {
    cancel: CancellationToken,
    /// Resolved by `grant_approval`.
    approval: Option<oneshot::Sender<()>>,
}

struct Inner {
    store: QueueStore,
    preferences: Arc<PreferenceStore>,
    engines: Engines,
    transport: Arc<dyn MediaTransport>,
    blobs: Arc<BlobRegistry>,
    throttle: TranscodeThrottle,
    batches: BatchTracker,
    config: QueueConfig,
    handles: Mutex<HashMap<QueueItemId, ItemHandle>>,
    shutdown: CancellationToken,
}

/// Client-side media upload queue.
///
/// Cheap to clone; clones share the same queue. Entry points spawn tasks and
/// must be called from within a tokio runtime.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

/// Builder for [`UploadQueue`].
#[derive(Default)]
pub struct UploadQueueBuilder {
    transport: Option<Arc<dyn MediaTransport>>,
    preferences: Option<Arc<PreferenceStore>>,
    engines: Option<Engines>,
    blobs: Option<Arc<BlobRegistry>>,
    config: Option<QueueConfig>,
}

impl UploadQueueBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn MediaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Engines to use. Without this, only the ffmpeg engine is available.
    pub fn with_engines(mut self, engines: Engines) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Registry shared with engines that resolve preview URLs.
    pub fn with_blob_registry(mut self, blobs: Arc<BlobRegistry>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<UploadQueue> {
        let transport = self
            .transport
            .ok_or_else(|| Error::config("Upload queue needs a transport"))?;
        let config = self.config.unwrap_or_default();
        let blobs = self.blobs.unwrap_or_default();
        let engines = self.engines.unwrap_or_else(|| Engines {
            media: Arc::new(FfmpegEngine::new().with_blob_registry(blobs.clone())),
            ..Default::default()
        });
        debug!(
            isolated_context = config.isolated_context,
            "Building upload queue"
        );

        Ok(UploadQueue {
            inner: Arc::new(Inner {
                store: QueueStore::new(config.event_capacity),
                preferences: self.preferences.unwrap_or_default(),
                engines,
                transport,
                blobs,
                throttle: TranscodeThrottle::new(),
                batches: BatchTracker::new(),
                config,
                handles: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

impl UploadQueue {
    pub fn builder() -> UploadQueueBuilder {
        UploadQueueBuilder::default()
    }

    /// Queue-wide change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.store.subscribe()
    }

    pub fn snapshot(&self) -> State {
        self.inner.store.snapshot()
    }

    pub fn get_item(&self, id: QueueItemId) -> Option<Arc<QueueItem>> {
        self.inner.store.get_item(id)
    }

    pub fn throttle(&self) -> &TranscodeThrottle {
        &self.inner.throttle
    }

    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.inner.blobs
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.inner.preferences
    }

    /// Enqueue one file. Progress and the outcome arrive on `args.listener`.
    pub fn add_item(&self, args: AddItemArgs) -> QueueItemId {
        let prefs = self.inner.preferences.snapshot();
        let item = self.build_item(args, &prefs);
        self.enqueue(vec![item])[0]
    }

    /// Enqueue `files` under a fresh batch id.
    pub fn add_items(
        &self,
        files: Vec<MediaFile>,
        additional_data: AdditionalData,
        listener: Option<UploadListener>,
    ) -> Vec<QueueItemId> {
        let prefs = self.inner.preferences.snapshot();
        let batch_id = BatchId::new();
        let items = files
            .into_iter()
            .map(|file| {
                let args = AddItemArgs {
                    batch_id: Some(batch_id),
                    additional_data: additional_data.clone(),
                    listener: listener.clone(),
                    ..AddItemArgs::new(file)
                };
                self.build_item(args, &prefs)
            })
            .collect();
        self.enqueue(items)
    }

    /// Validate `args.files` and enqueue the valid ones as one batch.
    ///
    /// Rejected files never enter the queue; their errors are returned in
    /// file order and also sent to the listener.
    pub fn upload_media(&self, args: UploadMediaArgs) -> Vec<std::result::Result<QueueItemId, UploadError>> {
        let mut validation = self.inner.config.validation.clone();
        if args.allowed_types.is_some() {
            validation.allowed_types = args.allowed_types;
        }

        let mut valid = Vec::new();
        let mut outcomes = Vec::with_capacity(args.files.len());
        for file in args.files {
            match validate_file(&file, &validation) {
                Ok(()) => {
                    outcomes.push(None);
                    valid.push(file);
                }
                Err(error) => {
                    warn!(file = %file.name(), code = %error.code, "Rejected file");
                    if let Some(listener) = &args.listener {
                        listener.notify(UploadNotification::Failed(error.clone()));
                    }
                    outcomes.push(Some(error));
                }
            }
        }

        if valid.is_empty() {
            return outcomes.into_iter().flatten().map(Err).collect();
        }

        let mut ids = self
            .add_items(valid, args.additional_data, args.listener)
            .into_iter();
        outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Some(error) => Some(Err(error)),
                None => ids.next().map(Ok),
            })
            .collect()
    }

    /// Download `url` and enqueue it as an import.
    pub async fn add_item_from_url(
        &self,
        url: &str,
        additional_data: AdditionalData,
        listener: Option<UploadListener>,
    ) -> Result<QueueItemId> {
        let file = self.inner.transport.fetch_remote_file(url, None).await?;
        Ok(self.add_item(AddItemArgs {
            additional_data,
            listener,
            source_url: Some(url.to_string()),
            media_source_terms: vec!["media-import".to_string()],
            ..AddItemArgs::new(file)
        }))
    }

    /// Enqueue a file to attach to an existing attachment.
    pub fn add_sideload_item(&self, args: AddSideloadItemArgs) -> QueueItemId {
        self.enqueue(vec![sideload_item(args)])[0]
    }

    /// Re-upload an existing video without its audio track.
    pub async fn mute_existing_video(&self, args: ExistingItemArgs) -> Result<QueueItemId> {
        let mut item = self.existing_item(&args, "muted").await?;
        item.additional_data = args.additional_data;
        item.transcode = Some(vec![TranscodingType::MuteVideo]);
        item.listener = args.listener;
        Ok(self.enqueue(vec![item])[0])
    }

    /// Re-upload an optimized copy of an existing image, linking the two.
    ///
    /// With `require_approval` the item waits in `PendingApproval` until
    /// [`grant_approval`](Self::grant_approval) or
    /// [`reject_approval`](Self::reject_approval) is called with `args.id`.
    pub async fn optimize_existing_item(&self, args: ExistingItemArgs) -> Result<QueueItemId> {
        let prefs = self.inner.preferences.snapshot();
        let mut item = self.existing_item(&args, "optimized").await?;
        item.additional_data = sub_sizes_data(&prefs, args.additional_data);
        item.media_source_terms = vec!["media-optimization".to_string()];
        item.transcode = Some(vec![TranscodingType::OptimizeExisting]);
        // Approval is keyed by the existing attachment until the copy is uploaded.
        item.attachment.id = Some(args.id);
        item.listener = Some(self.link_optimized(args.id, args.listener));
        Ok(self.enqueue(vec![item])[0])
    }

    /// Generate subtitles for a video and upload them as a new attachment.
    pub async fn add_subtitles_for_existing_video(
        &self,
        id: Option<u64>,
        url: &str,
        additional_data: AdditionalData,
        listener: Option<UploadListener>,
    ) -> Result<QueueItemId> {
        let file_name = file_name_from_url(url);
        let source = self
            .inner
            .transport
            .fetch_remote_file(url, Some(&file_name))
            .await?;
        let vtt = self.inner.engines.subtitles.generate_subtitles(&source).await?;

        let mut item = QueueItem::new(vtt);
        item.source_file = source;
        item.source_url = Some(url.to_string());
        item.source_attachment_id = id;
        item.media_source_terms = vec!["subtitles-generation".to_string()];
        item.additional_data = additional_data;
        item.listener = listener;
        Ok(self.enqueue(vec![item])[0])
    }

    /// Cancel an item on behalf of the user.
    pub fn cancel_item(&self, id: QueueItemId) -> Result<()> {
        let item = self
            .get_item(id)
            .ok_or_else(|| Error::not_found("queue item", id))?;
        self.cancel_with(id, UploadError::cancelled_manually(item.file.clone()))
    }

    /// Drop an item from the queue, cancelling it first if still running.
    pub fn remove_item(&self, id: QueueItemId) -> Result<()> {
        let item = self
            .get_item(id)
            .ok_or_else(|| Error::not_found("queue item", id))?;
        if !item.status.is_terminal() {
            self.cancel_item(id)?;
        }
        self.inner.store.dispatch(Action::Remove(id))?;
        for url in [&item.attachment.url, &item.attachment.poster]
            .into_iter()
            .flatten()
        {
            self.inner.blobs.revoke(url);
        }
        debug!(item_id = %id, "Removed item");
        Ok(())
    }

    /// Let the item holding `attachment_id` continue to upload.
    pub fn grant_approval(&self, attachment_id: u64) -> Result<()> {
        let item = self
            .snapshot()
            .get_item_by_attachment_id(attachment_id)
            .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
        self.inner.store.dispatch(Action::ApproveUpload(item.id))?;
        if let Some(tx) = self
            .inner
            .handles
            .lock()
            .get_mut(&item.id)
            .and_then(|handle| handle.approval.take())
        {
            let _ = tx.send(());
        }
        info!(item_id = %item.id, attachment_id, "Upload approved");
        Ok(())
    }

    /// Discard the item holding `attachment_id`.
    pub fn reject_approval(&self, attachment_id: u64) -> Result<()> {
        let item = self
            .snapshot()
            .get_item_by_attachment_id(attachment_id)
            .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
        info!(item_id = %item.id, attachment_id, "Upload rejected");
        self.cancel_with(item.id, UploadError::cancelled(item.file.clone()))
    }

    pub fn set_media_source_terms(&self, terms: HashMap<String, u64>) -> Result<()> {
        self.inner.store.dispatch(Action::SetMediaSourceTerms(terms))
    }

    pub fn set_image_sizes(&self, sizes: HashMap<String, ImageSizeCrop>) -> Result<()> {
        self.inner.store.dispatch(Action::SetImageSizes(sizes))
    }

    /// Stop every driver and empty the queue.
    pub fn shutdown(&self) {
        info!("Shutting down upload queue");
        self.inner.shutdown.cancel();
        self.inner.handles.lock().clear();
        self.inner.store.clear();
    }

    fn build_item(&self, args: AddItemArgs, prefs: &UploadPreferences) -> QueueItem {
        let resize = args.resize.or_else(|| {
            (!args.is_sideload && prefs.big_image_size_threshold > 0).then(|| {
                ImageSizeCrop::new(
                    prefs.big_image_size_threshold,
                    prefs.big_image_size_threshold,
                )
            })
        });

        let additional_data = if args.is_sideload {
            let mut data = AdditionalData::new();
            data.insert("generate_sub_sizes".to_string(), Value::Bool(false));
            merge_additional_data(&mut data, args.additional_data);
            data
        } else {
            sub_sizes_data(prefs, args.additional_data)
        };

        let mut item = QueueItem::new(args.file);
        if !args.is_sideload {
            item.attachment = Attachment::with_url(self.inner.blobs.create(&item.file));
        }
        item.batch_id = args.batch_id;
        item.additional_data = additional_data;
        item.source_url = args.source_url;
        item.source_attachment_id = args.source_attachment_id;
        item.media_source_terms = args.media_source_terms;
        item.blur_hash = args.blur_hash;
        item.dominant_color = args.dominant_color;
        item.resize = resize;
        item.transcode = args.transcode;
        item.is_sideload = args.is_sideload;
        item.listener = args.listener;
        item
    }

    /// Fetch an existing attachment as `{basename}-{suffix}`.
    async fn existing_item(&self, args: &ExistingItemArgs, suffix: &str) -> Result<QueueItem> {
        let file_name = file_name_from_url(&args.url);
        let source = self
            .inner
            .transport
            .fetch_remote_file(&args.url, Some(&file_name))
            .await?;
        let file = source.renamed(with_basename_suffix(source.name(), suffix));

        let mut item = QueueItem::new(file);
        item.source_file = source;
        item.batch_id = args.batch_id;
        item.attachment = Attachment {
            url: Some(args.url.clone()),
            poster: args.poster.clone(),
            ..Default::default()
        };
        item.source_url = Some(args.url.clone());
        item.source_attachment_id = Some(args.id);
        item.blur_hash = args.blur_hash.clone();
        item.dominant_color = args.dominant_color.clone();
        item.generated_poster_id = args.generated_poster_id;
        Ok(item)
    }

    /// Add `items` and start their drivers.
    ///
    /// Batch members are all registered before any driver starts, so an early
    /// finisher cannot complete the batch alone.
    fn enqueue(&self, items: Vec<QueueItem>) -> Vec<QueueItemId> {
        for item in &items {
            if let Some(batch_id) = item.batch_id {
                self.inner.batches.register(batch_id, item.listener.as_ref());
            }
        }

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id;
            let cancel = self.inner.shutdown.child_token();
            info!(
                item_id = %id,
                file = %item.file.name(),
                mime_type = %item.file.mime_type(),
                sideload = item.is_sideload,
                "Adding item to upload queue"
            );

            ids.push(id);
            self.inner.handles.lock().insert(
                id,
                ItemHandle {
                    cancel: cancel.clone(),
                    approval: None,
                },
            );
            if let Err(e) = self.inner.store.dispatch(Action::Add(Box::new(item))) {
                warn!(item_id = %id, error = %e, "Failed to add item");
                self.inner.handles.lock().remove(&id);
                continue;
            }

            let queue = self.clone();
            tokio::spawn(async move { queue.drive(id, cancel).await });
        }
        ids
    }

    /// Move `id` to `Cancelled`, stop its driver and report the error.
    fn cancel_with(&self, id: QueueItemId, error: UploadError) -> Result<()> {
        self.inner.store.dispatch(Action::Cancel {
            id,
            error: error.clone(),
        })?;
        if let Some(handle) = self.inner.handles.lock().remove(&id) {
            handle.cancel.cancel();
        }
        warn!(item_id = %id, code = %error.code, "Upload cancelled: {}", error.message);

        if let Some(item) = self.get_item(id) {
            if let Some(listener) = &item.listener {
                listener.notify(UploadNotification::Failed(error));
            }
            if let Some(batch_id) = item.batch_id {
                self.inner.batches.complete(batch_id, None);
            }
        }
        Ok(())
    }

    /// Send the item's current attachment to its listener.
    fn notify_changed(&self, id: QueueItemId) {
        if let Some(item) = self.get_item(id)
            && let Some(listener) = &item.listener
        {
            listener.notify(UploadNotification::Changed(item.attachment.clone()));
        }
    }

    /// Release `url` if it is a preview URL other than `keep`.
    fn release_superseded(&self, url: Option<&str>, keep: &str) {
        if let Some(url) = url
            && url != keep
            && is_blob_url(url)
        {
            self.inner.blobs.revoke(url);
        }
    }
}

fn sideload_item(args: AddSideloadItemArgs) -> QueueItem {
    let mut additional_data = AdditionalData::new();
    additional_data.insert("generate_sub_sizes".to_string(), Value::Bool(false));
    merge_additional_data(&mut additional_data, args.additional_data);

    let mut item = QueueItem::new(args.file);
    item.batch_id = args.batch_id;
    item.additional_data = additional_data;
    item.is_sideload = true;
    item.resize = args.resize;
    item.transcode = args.transcode;
    item
}

/// `generate_sub_sizes` is on when the server generates thumbnails; caller data wins.
fn sub_sizes_data(prefs: &UploadPreferences, data: AdditionalData) -> AdditionalData {
    let mut merged = AdditionalData::new();
    merged.insert(
        "generate_sub_sizes".to_string(),
        Value::Bool(prefs.thumbnail_generation == ThumbnailGeneration::Server),
    );
    merge_additional_data(&mut merged, data);
    merged
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("items", &self.inner.store.len())
            .field("throttle", &self.inner.throttle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RestTransport, RestTransportConfig};

    fn queue() -> UploadQueue {
        UploadQueue::builder()
            .with_transport(Arc::new(RestTransport::new(RestTransportConfig::default())))
            .build()
            .unwrap()
    }

    fn png() -> MediaFile {
        MediaFile::new("a.png", "image/png", vec![0u8; 4])
    }

    #[test]
    fn test_sub_sizes_follow_thumbnail_generation() {
        let mut prefs = UploadPreferences::default();
        let data = sub_sizes_data(&prefs, AdditionalData::new());
        assert_eq!(data["generate_sub_sizes"], Value::Bool(false));

        prefs.thumbnail_generation = ThumbnailGeneration::Server;
        let data = sub_sizes_data(&prefs, AdditionalData::new());
        assert_eq!(data["generate_sub_sizes"], Value::Bool(true));

        let mut caller = AdditionalData::new();
        caller.insert("generate_sub_sizes".to_string(), Value::Bool(false));
        let data = sub_sizes_data(&prefs, caller);
        assert_eq!(data["generate_sub_sizes"], Value::Bool(false));
    }

    #[test]
    fn test_build_item_defaults() {
        let queue = queue();
        let prefs = UploadPreferences::default();

        let item = queue.build_item(AddItemArgs::new(png()), &prefs);
        assert_eq!(item.status, crate::queue::ItemStatus::Pending);
        assert_eq!(item.resize, Some(ImageSizeCrop::new(2560, 2560)));
        assert!(item.attachment.url.as_deref().is_some_and(is_blob_url));
        assert_eq!(queue.blobs().len(), 1);

        let sideload = queue.build_item(
            AddItemArgs {
                is_sideload: true,
                ..AddItemArgs::new(png())
            },
            &prefs,
        );
        assert!(sideload.resize.is_none());
        assert!(sideload.attachment.url.is_none());
        assert_eq!(sideload.additional_data["generate_sub_sizes"], Value::Bool(false));
    }

    #[test]
    fn test_no_resize_without_threshold() {
        let prefs = UploadPreferences {
            big_image_size_threshold: 0,
            ..Default::default()
        };
        let item = queue().build_item(AddItemArgs::new(png()), &prefs);
        assert!(item.resize.is_none());
    }

    #[test]
    fn test_sideload_item() {
        let item = sideload_item(AddSideloadItemArgs::new(png(), 5));
        assert!(item.is_sideload);
        assert_eq!(item.additional_data["post"], Value::from(5u64));
        assert_eq!(item.additional_data["generate_sub_sizes"], Value::Bool(false));
        assert!(item.transcode.is_none());
    }

    #[test]
    fn test_unknown_attachment_approval() {
        let queue = queue();
        assert!(matches!(
            queue.grant_approval(1),
            Err(Error::NotFound { .. })
        ));
        assert!(queue.reject_approval(1).is_err());
    }
}

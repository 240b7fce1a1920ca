//! Per-item driver: prepare, transcode, approval, upload.

use std::future::Future;

use media_utils::MediaType;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::UploadQueue;
use crate::Error;
use crate::effects::{EffectContext, collect_side_effects};
use crate::error::{ErrorCode, UploadError};
use crate::notification::UploadNotification;
use crate::queue::{
    Action, AdditionalData, ItemStatus, QueueItem, QueueItemId, TranscodingType,
    merge_additional_data,
};
use crate::transcode::{TranscodeOperation, classify, execute, select_operation};

/// Why a driver stopped early.
enum Stop {
    /// Cancelled or removed elsewhere; nothing left to report.
    Cancelled,
    /// The driver hit an error and must cancel the item itself.
    Failed(UploadError),
}

type Step<T = ()> = std::result::Result<T, Stop>;

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Step<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Stop::Cancelled),
        out = fut => Ok(out),
    }
}

impl UploadQueue {
    pub(super) async fn drive(self, id: QueueItemId, cancel: CancellationToken) {
        match self.run_item(id, &cancel).await {
            Ok(()) => {}
            Err(Stop::Cancelled) => debug!(item_id = %id, "Item driver stopped"),
            Err(Stop::Failed(error)) => self.fail(id, error),
        }
        self.inner.handles.lock().remove(&id);
    }

    #[instrument(skip(self, cancel), fields(item_id = %id))]
    async fn run_item(&self, id: QueueItemId, cancel: &CancellationToken) -> Step {
        self.prepare(id, cancel).await?;
        self.transcode(id, cancel).await?;

        let item = self.item(id)?;
        self.apply(Action::UploadStart(id))?;
        if item.is_sideload {
            self.sideload(&item, cancel).await
        } else {
            self.upload(&item, cancel).await
        }
    }

    fn fail(&self, id: QueueItemId, error: UploadError) {
        if let Err(e) = self.cancel_with(id, error) {
            debug!(item_id = %id, error = %e, "Could not cancel item");
        }
    }

    fn item(&self, id: QueueItemId) -> Step<std::sync::Arc<QueueItem>> {
        self.get_item(id).ok_or(Stop::Cancelled)
    }

    /// Dispatch `action`; a rejected transition of a live item fails it.
    fn apply(&self, action: Action) -> Step {
        let id = action.item_id();
        self.inner
            .store
            .dispatch(action)
            .map_err(|e| self.stop_reason(id, e))
    }

    fn stop_reason(&self, id: Option<QueueItemId>, error: Error) -> Stop {
        match id.and_then(|id| self.get_item(id)) {
            Some(item) if item.status != ItemStatus::Cancelled => Stop::Failed(
                error.into_upload_error(ErrorCode::UnknownUploadError, &item.file),
            ),
            _ => Stop::Cancelled,
        }
    }

    async fn prepare(&self, id: QueueItemId, cancel: &CancellationToken) -> Step {
        let item = self.item(id)?;
        self.apply(Action::Prepare(id))?;

        if item.transcode.is_some() {
            return self.apply(Action::TranscodingPrepare {
                id,
                transcode: None,
            });
        }

        if matches!(item.file.media_type(), MediaType::Video | MediaType::Pdf) {
            self.extract_poster(&item, cancel).await?;
        }

        let prefs = self.inner.preferences.snapshot();
        let can_transcode = self.inner.engines.media.can_transcode(&item.file);
        let plan = classify(&item.file, &prefs, can_transcode);
        debug!(item_id = %id, plan = ?plan, "Classified item");
        self.apply(Action::TranscodingPrepare {
            id,
            transcode: Some(plan),
        })
    }

    /// Poster frame of a video or first page of a PDF. Failure is not fatal.
    async fn extract_poster(&self, item: &QueueItem, cancel: &CancellationToken) -> Step {
        let engines = &self.inner.engines;
        let source_url = self.inner.blobs.create(&item.file);
        let basename = item.file.basename();

        let result = if item.file.media_type() == MediaType::Pdf {
            cancellable(
                cancel,
                engines
                    .pdf
                    .image_from_pdf(&source_url, &format!("{basename}-pdf")),
            )
            .await
        } else {
            cancellable(
                cancel,
                engines
                    .media
                    .poster_from_video(&source_url, &format!("{basename}-poster")),
            )
            .await
        };
        self.inner.blobs.revoke(&source_url);

        let poster = match result? {
            Ok(poster) => poster,
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "Poster extraction failed");
                return Ok(());
            }
        };

        let url = self.inner.blobs.create(&poster);
        if let Err(stop) = self.apply(Action::AddPoster {
            id: item.id,
            file: poster,
            url: url.clone(),
        }) {
            self.inner.blobs.revoke(&url);
            return Err(stop);
        }
        self.release_superseded(item.attachment.poster.as_deref(), &url);
        self.notify_changed(item.id);
        Ok(())
    }

    /// Run the plan to completion, including a possible approval wait.
    async fn transcode(&self, id: QueueItemId, cancel: &CancellationToken) -> Step {
        loop {
            let item = self.item(id)?;
            let Some(kind) = item.current_step() else {
                return self.finish_unchanged(&item);
            };

            let prefs = self.inner.preferences.snapshot();
            let operation = select_operation(kind, &item, &prefs).map_err(Stop::Failed)?;
            if operation == TranscodeOperation::Passthrough {
                self.finish_unchanged(&item)?;
            } else if let Some(approval) = self.run_step(&item, kind, &operation, cancel).await? {
                info!(item_id = %id, "Waiting for approval");
                return match cancellable(cancel, approval).await? {
                    Ok(()) => Ok(()),
                    Err(_) => Err(Stop::Cancelled),
                };
            }

            if self.item(id)?.current_step().is_none() {
                return Ok(());
            }
            self.apply(Action::ContinueTranscoding(id))?;
        }
    }

    /// Finish the current step keeping the working file.
    fn finish_unchanged(&self, item: &QueueItem) -> Step {
        let (url, created) = match &item.attachment.url {
            Some(url) => (url.clone(), false),
            None => (self.inner.blobs.create(&item.file), true),
        };
        let result = self.apply(Action::TranscodingFinish {
            id: item.id,
            file: item.file.clone(),
            url: url.clone(),
            media_source_term: None,
            additional_data: AdditionalData::new(),
        });
        if result.is_err() && created {
            self.inner.blobs.revoke(&url);
        }
        result
    }

    /// Execute one plan step. Returns the approval receiver when the result
    /// must be approved before upload.
    async fn run_step(
        &self,
        item: &QueueItem,
        kind: TranscodingType,
        operation: &TranscodeOperation,
        cancel: &CancellationToken,
    ) -> Step<Option<oneshot::Receiver<()>>> {
        let id = item.id;
        let _permit = if kind.is_throttled() {
            let acquired = cancellable(cancel, self.inner.throttle.acquire(id.to_string())).await?;
            Some(acquired.map_err(|e| {
                Stop::Failed(e.into_upload_error(operation.error_code(), &item.file))
            })?)
        } else {
            None
        };

        self.apply(Action::TranscodingStart(id))?;
        debug!(item_id = %id, step = ?kind, "Transcoding");

        let file = match cancellable(cancel, execute(operation, &item.file, &self.inner.engines))
            .await?
        {
            Ok(file) => file,
            Err(e) => {
                // Cancel while still holding the slot so no other item
                // starts before this one left `Transcoding`.
                self.fail(id, e.into_upload_error(operation.error_code(), &item.file));
                return Err(Stop::Cancelled);
            }
        };

        let url = self.inner.blobs.create(&file);
        let approval = operation.requires_approval().then(|| {
            let (tx, rx) = oneshot::channel();
            if let Some(handle) = self.inner.handles.lock().get_mut(&id) {
                handle.approval = Some(tx);
            }
            rx
        });

        let action = if approval.is_some() {
            Action::RequestApproval {
                id,
                file,
                url: url.clone(),
            }
        } else {
            Action::TranscodingFinish {
                id,
                file,
                url: url.clone(),
                media_source_term: operation.media_source_term().map(str::to_string),
                additional_data: operation.additional_data(),
            }
        };
        if let Err(stop) = self.apply(action) {
            self.inner.blobs.revoke(&url);
            return Err(stop);
        }

        self.release_superseded(item.attachment.url.as_deref(), &url);
        self.notify_changed(id);
        info!(item_id = %id, step = ?kind, "Transcode step done");
        Ok(approval)
    }

    /// Upload fields derived from the item itself.
    fn upload_data(&self, item: &QueueItem) -> AdditionalData {
        let state = self.inner.store.snapshot();
        let mut data = item.additional_data.clone();

        let terms: Vec<Value> = item
            .media_source_terms
            .iter()
            .filter_map(|slug| state.get_media_source_term_id(slug))
            .map(Value::from)
            .collect();
        data.insert("mexp_media_source".to_string(), Value::Array(terms));

        let mut meta = match data.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        meta.insert(
            "mexp_generated_poster_id".to_string(),
            json!(item.generated_poster_id),
        );
        meta.insert(
            "mexp_original_id".to_string(),
            json!(item.source_attachment_id),
        );
        data.insert("meta".to_string(), Value::Object(meta));

        data.insert("mexp_blurhash".to_string(), json!(item.blur_hash));
        data.insert("mexp_dominant_color".to_string(), json!(item.dominant_color));
        data.insert("featured_media".to_string(), json!(item.generated_poster_id));
        data
    }

    async fn upload(&self, item: &QueueItem, cancel: &CancellationToken) -> Step {
        let id = item.id;
        let mut data = self.upload_data(item);
        let ctx = EffectContext {
            engines: &self.inner.engines,
            blobs: &self.inner.blobs,
            isolated_context: self.inner.config.isolated_context,
        };
        cancellable(cancel, collect_side_effects(item, &mut data, &ctx)).await?;

        let result = cancellable(
            cancel,
            self.inner
                .transport
                .upload_to_server(&item.file, &data, cancel),
        )
        .await?;
        let mut attachment = result.map_err(|e| {
            Stop::Failed(e.into_upload_error(ErrorCode::UnknownUploadError, &item.file))
        })?;

        if item.file.media_type() == MediaType::Video {
            if let Some(poster) = &item.attachment.poster {
                attachment.poster = Some(poster.clone());
            } else if let Some(poster) = &item.poster {
                attachment.poster = Some(self.inner.blobs.create(poster));
            }
        }

        self.apply(Action::UploadFinish { id, attachment })?;
        if let Some(url) = item.attachment.url.as_deref()
            && crate::blob::is_blob_url(url)
        {
            self.inner.blobs.revoke(url);
        }
        self.notify_changed(id);

        let uploaded = self.item(id)?;
        info!(
            item_id = %id,
            attachment_id = ?uploaded.attachment.id,
            file = %uploaded.file.name(),
            "Upload finished"
        );

        self.fan_out(&uploaded).await;
        self.succeed(&uploaded, uploaded.attachment.clone())
    }

    async fn sideload(&self, item: &QueueItem, cancel: &CancellationToken) -> Step {
        let mut data = AdditionalData::new();
        if let Some(name) = item.resize.as_ref().and_then(|size| size.name.clone()) {
            data.insert("image_size".to_string(), Value::String(name));
        }
        merge_additional_data(&mut data, item.additional_data.clone());

        let Some(parent) = data.get("post").and_then(Value::as_u64) else {
            return Err(Stop::Failed(UploadError::new(
                ErrorCode::UnknownUploadError,
                "Sideload without a parent attachment",
                item.file.clone(),
            )));
        };

        let result = cancellable(
            cancel,
            self.inner
                .transport
                .sideload_to_server(&item.file, parent, &data, cancel),
        )
        .await?;
        let attachment = result.map_err(|e| {
            Stop::Failed(e.into_upload_error(ErrorCode::UnknownUploadError, &item.file))
        })?;

        self.apply(Action::SideloadFinish(item.id))?;
        if let Some(url) = item.attachment.url.as_deref()
            && crate::blob::is_blob_url(url)
        {
            self.inner.blobs.revoke(url);
        }
        info!(
            item_id = %item.id,
            parent,
            image_size = ?data.get("image_size"),
            "Sideload finished"
        );
        self.succeed(item, attachment)
    }

    /// Report success and drop the item from the queue.
    fn succeed(&self, item: &QueueItem, attachment: crate::queue::Attachment) -> Step {
        if let Some(listener) = &item.listener {
            listener.notify(UploadNotification::Succeeded(attachment.clone()));
        }
        if let Some(batch_id) = item.batch_id {
            self.inner.batches.complete(batch_id, Some(attachment));
        }
        self.apply(Action::Remove(item.id))
    }
}

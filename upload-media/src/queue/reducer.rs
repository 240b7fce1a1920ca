//! Pure state transitions of the queue.
//!
//! `reduce` never mutates its input: the matching item is rebuilt behind a new
//! `Arc` and every other item keeps its identity.

use std::collections::HashMap;
use std::sync::Arc;

use media_utils::MediaFile;

use super::item::{
    AdditionalData, Attachment, ImageSizeCrop, ItemStatus, QueueItem, QueueItemId,
    TranscodingType, merge_additional_data,
};
use crate::error::UploadError;
use crate::{Error, Result};

/// Queue state: ordered items plus the two lookup tables.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub queue: Vec<Arc<QueueItem>>,
    pub media_source_terms: Arc<HashMap<String, u64>>,
    pub image_sizes: Arc<HashMap<String, ImageSizeCrop>>,
}

/// Events understood by [`reduce`].
#[derive(Debug, Clone)]
pub enum Action {
    Add(Box<QueueItem>),
    Prepare(QueueItemId),
    AddPoster {
        id: QueueItemId,
        file: MediaFile,
        url: String,
    },
    /// Attach the plan. `None` keeps a plan fixed before classification.
    TranscodingPrepare {
        id: QueueItemId,
        transcode: Option<Vec<TranscodingType>>,
    },
    /// Loop back from `Transcoded` while plan steps remain.
    ContinueTranscoding(QueueItemId),
    TranscodingStart(QueueItemId),
    TranscodingFinish {
        id: QueueItemId,
        file: MediaFile,
        url: String,
        media_source_term: Option<String>,
        additional_data: AdditionalData,
    },
    RequestApproval {
        id: QueueItemId,
        file: MediaFile,
        url: String,
    },
    ApproveUpload(QueueItemId),
    UploadStart(QueueItemId),
    UploadFinish {
        id: QueueItemId,
        attachment: Attachment,
    },
    SideloadFinish(QueueItemId),
    Cancel {
        id: QueueItemId,
        error: UploadError,
    },
    Remove(QueueItemId),
    SetMediaSourceTerms(HashMap<String, u64>),
    SetImageSizes(HashMap<String, ImageSizeCrop>),
}

impl Action {
    /// Item the action targets, if any.
    pub fn item_id(&self) -> Option<QueueItemId> {
        match self {
            Action::Add(item) => Some(item.id),
            Action::Prepare(id)
            | Action::ContinueTranscoding(id)
            | Action::TranscodingStart(id)
            | Action::ApproveUpload(id)
            | Action::UploadStart(id)
            | Action::SideloadFinish(id)
            | Action::Remove(id) => Some(*id),
            Action::AddPoster { id, .. }
            | Action::TranscodingPrepare { id, .. }
            | Action::TranscodingFinish { id, .. }
            | Action::RequestApproval { id, .. }
            | Action::UploadFinish { id, .. }
            | Action::Cancel { id, .. } => Some(*id),
            Action::SetMediaSourceTerms(_) | Action::SetImageSizes(_) => None,
        }
    }

    /// Status the action leads to, for item-scoped status changes.
    fn target_status(&self) -> Option<ItemStatus> {
        Some(match self {
            Action::Prepare(_) => ItemStatus::Preparing,
            Action::TranscodingPrepare { .. } | Action::ContinueTranscoding(_) => {
                ItemStatus::PendingTranscoding
            }
            Action::TranscodingStart(_) => ItemStatus::Transcoding,
            Action::TranscodingFinish { .. } => ItemStatus::Transcoded,
            Action::RequestApproval { .. } => ItemStatus::PendingApproval,
            Action::ApproveUpload(_) => ItemStatus::Approved,
            Action::UploadStart(_) => ItemStatus::Uploading,
            Action::UploadFinish { .. } | Action::SideloadFinish(_) => ItemStatus::Uploaded,
            Action::Cancel { .. } => ItemStatus::Cancelled,
            _ => return None,
        })
    }
}

/// Whether `action` may be applied to an item currently in `from`.
fn is_allowed(from: ItemStatus, action: &Action) -> bool {
    use ItemStatus::*;

    match action {
        Action::Prepare(_) => from == Pending,
        Action::AddPoster { .. } => !from.is_terminal(),
        Action::TranscodingPrepare { .. } => from == Preparing,
        Action::ContinueTranscoding(_) => from == Transcoded,
        Action::TranscodingStart(_) => from == PendingTranscoding,
        // Passthrough finishes straight from PendingTranscoding.
        Action::TranscodingFinish { .. } => matches!(from, PendingTranscoding | Transcoding),
        Action::RequestApproval { .. } => from == Transcoding,
        Action::ApproveUpload(_) => from == PendingApproval,
        Action::UploadStart(_) => matches!(from, Transcoded | Approved),
        Action::UploadFinish { .. } | Action::SideloadFinish(_) => from == Uploading,
        Action::Cancel { .. } => !from.is_terminal(),
        Action::Remove(_) => true,
        Action::Add(_) | Action::SetMediaSourceTerms(_) | Action::SetImageSizes(_) => true,
    }
}

/// Apply one action, producing the next state.
///
/// Fails when the target item does not exist or the transition is not allowed
/// from its current status; a cancelled item accepts nothing but removal.
pub fn reduce(state: &State, action: Action) -> Result<State> {
    match action {
        Action::Add(item) => {
            let mut queue = state.queue.clone();
            queue.push(Arc::new(*item));
            Ok(State {
                queue,
                ..state.clone()
            })
        }
        Action::Remove(id) => {
            let queue = state
                .queue
                .iter()
                .filter(|item| item.id != id)
                .cloned()
                .collect::<Vec<_>>();
            if queue.len() == state.queue.len() {
                return Err(Error::not_found("queue item", id));
            }
            Ok(State {
                queue,
                ..state.clone()
            })
        }
        Action::SetMediaSourceTerms(terms) => Ok(State {
            media_source_terms: Arc::new(terms),
            ..state.clone()
        }),
        Action::SetImageSizes(sizes) => Ok(State {
            image_sizes: Arc::new(sizes),
            ..state.clone()
        }),
        action => update_item(state, action),
    }
}

fn update_item(state: &State, action: Action) -> Result<State> {
    let Some(id) = action.item_id() else {
        return Ok(state.clone());
    };

    let index = state
        .queue
        .iter()
        .position(|item| item.id == id)
        .ok_or_else(|| Error::not_found("queue item", id))?;
    let current = &state.queue[index];

    if !is_allowed(current.status, &action) {
        let to = action
            .target_status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "poster update".to_string());
        return Err(Error::invalid_transition(current.status, to));
    }

    let mut item = QueueItem::clone(current);
    apply(&mut item, action);

    let mut queue = state.queue.clone();
    queue[index] = Arc::new(item);
    Ok(State {
        queue,
        ..state.clone()
    })
}

fn apply(item: &mut QueueItem, action: Action) {
    match action {
        Action::Prepare(_) => item.status = ItemStatus::Preparing,
        Action::AddPoster { file, url, .. } => {
            item.poster = Some(file);
            item.attachment.poster = Some(url);
        }
        Action::TranscodingPrepare { transcode, .. } => {
            item.status = ItemStatus::PendingTranscoding;
            if let Some(plan) = transcode {
                item.transcode = Some(plan);
            } else if item.transcode.is_none() {
                item.transcode = Some(Vec::new());
            }
        }
        Action::ContinueTranscoding(_) => item.status = ItemStatus::PendingTranscoding,
        Action::TranscodingStart(_) => item.status = ItemStatus::Transcoding,
        Action::TranscodingFinish {
            file,
            url,
            media_source_term,
            additional_data,
            ..
        } => {
            item.status = ItemStatus::Transcoded;
            if let Some(plan) = item.transcode.as_mut()
                && !plan.is_empty()
            {
                plan.remove(0);
            }
            item.attachment.url = Some(url);
            item.attachment.mime_type = Some(file.mime_type().to_string());
            item.file = file;
            if let Some(term) = media_source_term
                && !item.media_source_terms.contains(&term)
            {
                item.media_source_terms.push(term);
            }
            merge_additional_data(&mut item.additional_data, additional_data);
        }
        Action::RequestApproval { file, url, .. } => {
            item.status = ItemStatus::PendingApproval;
            if let Some(plan) = item.transcode.as_mut()
                && !plan.is_empty()
            {
                plan.remove(0);
            }
            item.attachment.url = Some(url);
            item.attachment.mime_type = Some(file.mime_type().to_string());
            item.file = file;
        }
        Action::ApproveUpload(_) => item.status = ItemStatus::Approved,
        Action::UploadStart(_) => item.status = ItemStatus::Uploading,
        Action::UploadFinish { attachment, .. } => {
            item.status = ItemStatus::Uploaded;
            if attachment.blur_hash.is_some() {
                item.blur_hash = attachment.blur_hash.clone();
            }
            if attachment.dominant_color.is_some() {
                item.dominant_color = attachment.dominant_color.clone();
            }
            item.attachment = item.attachment.merged(&attachment);
        }
        Action::SideloadFinish(_) => item.status = ItemStatus::Uploaded,
        Action::Cancel { error, .. } => {
            item.status = ItemStatus::Cancelled;
            item.error = Some(error);
        }
        Action::Add(_)
        | Action::Remove(_)
        | Action::SetMediaSourceTerms(_)
        | Action::SetImageSizes(_) => {}
    }
}

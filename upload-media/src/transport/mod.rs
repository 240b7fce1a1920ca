//! Remote attachment store.

mod attachment;
mod form;
mod rest;

use async_trait::async_trait;
use media_utils::MediaFile;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::queue::{AdditionalData, Attachment};

pub use attachment::RestAttachment;
pub use form::{flatten_form_data, form_fields};
pub use rest::{RestAuth, RestTransport, RestTransportConfig};

/// Transport used to persist finished files.
///
/// Uploads observe `cancel` and give up as soon as it fires.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a new attachment from `file`.
    async fn upload_to_server(
        &self,
        file: &MediaFile,
        data: &AdditionalData,
        cancel: &CancellationToken,
    ) -> Result<Attachment>;

    /// Add `file` to the existing attachment `attachment_id` (e.g. as an image size).
    async fn sideload_to_server(
        &self,
        file: &MediaFile,
        attachment_id: u64,
        data: &AdditionalData,
        cancel: &CancellationToken,
    ) -> Result<Attachment>;

    /// Patch fields of an existing attachment.
    async fn update_media_item(&self, id: u64, data: serde_json::Value) -> Result<Attachment>;

    /// Download `url` into memory. `name` overrides the name derived from the URL.
    async fn fetch_remote_file(&self, url: &str, name: Option<&str>) -> Result<MediaFile>;
}

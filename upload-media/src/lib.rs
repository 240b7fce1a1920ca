//! Client-side media upload queue.
//!
//! Files added to an [`UploadQueue`] are prepared, transcoded, optionally
//! held for approval, uploaded (or sideloaded onto an existing attachment)
//! and followed by their child uploads: posters, missing image sizes and the
//! unscaled original.

pub mod blob;
pub mod config;
mod effects;
pub mod error;
pub mod logging;
pub mod notification;
pub mod queue;
pub mod transcode;
pub mod transport;
pub mod uploader;
pub mod validation;

pub use config::{PreferenceStore, QueueConfig, UploadPreferences};
pub use error::{EngineError, Error, ErrorCode, Result, UploadError};
pub use notification::{UploadListener, UploadNotification};
pub use queue::{Attachment, ItemStatus, QueueEvent, QueueItem, QueueItemId};
pub use transcode::Engines;
pub use transport::{MediaTransport, RestTransport, RestTransportConfig};
pub use uploader::{
    AddItemArgs, AddSideloadItemArgs, ExistingItemArgs, UploadMediaArgs, UploadQueue,
    UploadQueueBuilder,
};

pub use media_utils::{MediaFile, MediaType};

//! Local preview URLs for in-memory files.
//!
//! A preview URL (`blob:<uuid>`) stands in for a file until the remote
//! attachment exists. Each URL has exactly one owner, which revokes it once
//! superseded.

use std::collections::HashMap;

use media_utils::MediaFile;
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

const BLOB_SCHEME: &str = "blob:";

#[derive(Debug, Default)]
pub struct BlobRegistry {
    entries: Mutex<HashMap<String, MediaFile>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` and return its preview URL.
    pub fn create(&self, file: &MediaFile) -> String {
        let url = format!("{BLOB_SCHEME}{}", Uuid::new_v4());
        self.entries.lock().insert(url.clone(), file.clone());
        trace!(url = %url, file = %file.name(), "Created preview URL");
        url
    }

    /// Release a preview URL. Non-blob and unknown URLs are ignored.
    pub fn revoke(&self, url: &str) {
        if is_blob_url(url) && self.entries.lock().remove(url).is_some() {
            trace!(url = %url, "Revoked preview URL");
        }
    }

    pub fn resolve(&self, url: &str) -> Option<MediaFile> {
        self.entries.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn is_blob_url(url: &str) -> bool {
    url.starts_with(BLOB_SCHEME)
}

//! Checks applied to a file before it may enter the queue.

use std::collections::HashMap;

use media_utils::MediaFile;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, UploadError};

/// Site and call-site upload restrictions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Types accepted at the call site: either a full MIME type (`image/gif`)
    /// or a top-level type (`image`). `None` accepts everything.
    #[serde(default)]
    pub allowed_types: Option<Vec<String>>,
    /// Extension pattern to MIME type map of everything the user may upload.
    #[serde(default)]
    pub all_mime_types: Option<HashMap<String, String>>,
    /// Maximum size in bytes.
    #[serde(default)]
    pub max_upload_file_size: Option<u64>,
}

impl ValidationConfig {
    pub fn with_allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = Some(types.into_iter().map(Into::into).collect());
        self
    }
}

fn not_allowed(code: ErrorCode, file: &MediaFile) -> UploadError {
    UploadError::new(
        code,
        format!(
            "{}: Sorry, you are not allowed to upload this file type.",
            file.name()
        ),
        file.clone(),
    )
}

/// Reject files outside the call site's allow-list.
pub fn validate_mime_type(file: &MediaFile, allowed_types: Option<&[String]>) -> Result<(), UploadError> {
    let Some(allowed_types) = allowed_types else {
        return Ok(());
    };
    let mime_type = file.mime_type();
    if mime_type.is_empty() {
        return Ok(());
    }

    let allowed = allowed_types.iter().any(|allowed| {
        if allowed.contains('/') {
            allowed == mime_type
        } else {
            mime_type
                .strip_prefix(allowed.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        }
    });

    if allowed {
        Ok(())
    } else {
        Err(not_allowed(ErrorCode::MimeTypeNotSupported, file))
    }
}

/// Reject types the site does not allow for the current user.
pub fn validate_mime_type_for_user(
    file: &MediaFile,
    all_mime_types: Option<&HashMap<String, String>>,
) -> Result<(), UploadError> {
    let Some(all_mime_types) = all_mime_types else {
        return Ok(());
    };
    let mime_type = file.mime_type();
    if mime_type.is_empty() || all_mime_types.values().any(|m| m == mime_type) {
        return Ok(());
    }
    Err(not_allowed(ErrorCode::MimeTypeNotAllowedForUser, file))
}

pub fn validate_file_size(file: &MediaFile, max_upload_file_size: Option<u64>) -> Result<(), UploadError> {
    match max_upload_file_size {
        Some(max) if max > 0 && file.size() > max => Err(UploadError::new(
            ErrorCode::SizeAboveLimit,
            format!(
                "{}: This file exceeds the maximum upload size for this site.",
                file.name()
            ),
            file.clone(),
        )),
        _ => Ok(()),
    }
}

/// Run every check in order, stopping at the first failure.
pub fn validate_file(file: &MediaFile, config: &ValidationConfig) -> Result<(), UploadError> {
    validate_mime_type(file, config.allowed_types.as_deref())?;
    validate_mime_type_for_user(file, config.all_mime_types.as_ref())?;
    validate_file_size(file, config.max_upload_file_size)
}

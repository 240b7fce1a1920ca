//! Filename helpers shared by the pipeline stages.
//!
//! Derived files (posters, resized thumbnails, preserved originals) are named
//! after the file they come from by inserting a suffix before the extension,
//! e.g. `photo.jpeg` -> `photo-original.jpeg`.

use crate::file::ImageDimensions;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a string for use as a filename on all platforms.
///
/// Control and reserved characters become underscores (consecutive ones
/// collapse), leading/trailing spaces and dots are trimmed and an empty
/// result becomes `"unnamed"`.
///
/// ```
/// use media_utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world.png"), "hello_world.png");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed.to_string()
}

/// File name without the final extension.
pub fn file_basename(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Final extension without the dot, if any.
pub fn file_extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Insert `-{suffix}` between basename and extension.
pub fn with_basename_suffix(name: &str, suffix: &str) -> String {
    let base = file_basename(name);
    match file_extension(name) {
        Some(ext) => format!("{base}-{suffix}.{ext}"),
        None => format!("{base}-{suffix}"),
    }
}

/// Last path segment of a URL, without query string or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let path = without_fragment.split('?').next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    sanitize_filename(segment)
}

/// Name for the output of a resize step.
///
/// With `add_suffix` the dimensions are appended (`photo-150x150.jpeg`), but
/// only when the image actually changed size; otherwise the name is returned
/// untouched.
pub fn resized_file_name(name: &str, dimensions: &ImageDimensions, add_suffix: bool) -> String {
    if add_suffix && dimensions.was_resized() {
        with_basename_suffix(name, &dimensions.to_string())
    } else {
        name.to_string()
    }
}

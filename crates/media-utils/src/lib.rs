//! Shared media domain types.
//!
//! Everything in here is synchronous and free of I/O: MIME classification,
//! the in-memory [`MediaFile`] handed between pipeline stages, filename
//! manipulation and cheap content sniffing.

mod file;
pub mod filename;
mod mime;
pub mod sniff;

pub use file::{ImageDimensions, MediaFile};
pub use filename::{
    file_basename, file_extension, file_name_from_url, resized_file_name, sanitize_filename,
    with_basename_suffix,
};
pub use mime::{MediaType, extension_from_mime_type, mime_type_from_extension};

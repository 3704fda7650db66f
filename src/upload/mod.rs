//! Slide upload, lookup and listing.
//!
//! - [`secure_filename`] / [`allowed_file`]: client filename handling
//! - [`SlideStore`]: the upload directory, with streamed uploads via
//!   [`PendingUpload`] and directory listings as [`FileEntry`]

mod filename;
mod store;

pub use filename::{allowed_file, secure_filename, ALLOWED_EXTENSIONS};
pub use store::{FileEntry, PendingUpload, SlideStore};

mod local_reader;
mod range_reader;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub use local_reader::LocalFileReader;
pub use range_reader::RangeReader;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A temp path next to `path`, unique per call within this process.
///
/// Writers put the new content here and rename it over `path`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(name)
}

//! Filename sanitising and extension checks for uploaded slides.

/// Extensions accepted for slide uploads, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["svs", "tif", "tiff"];

/// Reduce a client-supplied filename to a safe, flat file name.
///
/// - non-ASCII characters are dropped
/// - path separators and whitespace runs become a single `_`
/// - anything outside `[A-Za-z0-9_.-]` is removed
/// - leading and trailing `.` and `_` are stripped
///
/// The result never contains a path separator and never starts with `.`,
/// so it cannot escape the upload directory. It may be empty.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Whether `filename` has one of [`ALLOWED_EXTENSIONS`].
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed)),
        None => false,
    }
}

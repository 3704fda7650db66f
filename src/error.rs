use thiserror::Error;

/// I/O errors that can occur when reading slide bytes from local storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the underlying file system
    #[error("File error: {0}")]
    File(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::File(err.to_string()),
        }
    }
}

/// Errors related to format detection and validation
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// The file holds no tiled pyramid level
    #[error("No pyramid levels found")]
    NoPyramidLevels,
}

/// Errors raised by the slide store when opening or reading a slide.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Native level index outside the pyramid
    #[error("Invalid level: {level} (slide has {level_count} levels)")]
    InvalidLevel { level: usize, level_count: usize },

    /// Region origin lies outside the level extent
    #[error("Region origin ({x}, {y}) lies outside level {level} ({width}x{height})")]
    RegionOutOfBounds {
        level: usize,
        x: u64,
        y: u64,
        width: u32,
        height: u32,
    },

    /// Stored tile could not be decoded
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },
}

/// Errors raised by the custom transform registry.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// Reading or writing the script file failed
    #[error("Script file error: {0}")]
    Io(String),

    /// The script text failed to compile
    #[error("Script compile error: {0}")]
    Compile(String),

    /// The top-level statements of the script failed while binding
    #[error("Script load error: {0}")]
    Bind(String),

    /// `process_tile` itself failed or returned something other than a tile
    #[error("Error inside 'process_tile': {0}")]
    Transform(String),
}

/// Errors that can occur while serving a tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// No slide has been uploaded or loaded yet
    #[error("No slide loaded")]
    NoSlideLoaded,

    /// Mapped native level lies outside the pyramid
    #[error("Level {level} is out of range for a slide with {level_count} levels")]
    LevelOutOfRange { level: i64, level_count: usize },

    /// Tile size of zero was requested
    #[error("Invalid tile size: {0}")]
    InvalidTileSize(u32),

    /// Region read failed
    #[error("Error processing tile: {0}")]
    Slide(#[from] SlideError),

    /// Fixed post-process stage failed
    #[error("Post-process stage failed: {message}")]
    PostProcess { message: String },

    /// Custom transform failed to load or run
    #[error("{0}")]
    Script(#[from] ScriptError),

    /// JPEG encoding failed
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },

    /// The request exceeded the configured tile timeout
    #[error("Tile request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Blocking worker panicked or was cancelled
    #[error("Tile worker failed: {message}")]
    Worker { message: String },
}

/// Errors raised by the segmentation overlay store.
#[derive(Debug, Clone, Error)]
pub enum OverlayError {
    /// Overlay type other than `centroid` or `contour`
    #[error("Invalid type")]
    InvalidType(String),

    /// No slide named in the query and none loaded
    #[error("No slide loaded")]
    NoSlide,

    /// Backing file absent
    #[error("Segmentation file not found")]
    NotFound(String),

    /// Backing file exists but could not be read or parsed
    #[error("Failed to read segmentation file: {0}")]
    Read(String),
}

/// Errors raised by upload, load and file listing.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("No file part")]
    NoFilePart,

    #[error("No selected file")]
    NoSelectedFile,

    #[error("File type not allowed")]
    FileTypeNotAllowed,

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("File exceeds the upload limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("File \"{0}\" not found")]
    NotFound(String),

    #[error("Error processing file: {0}")]
    Open(#[from] SlideError),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors raised by the preprocessing job tracker.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("No slide loaded")]
    NoSlideLoaded,

    #[error("A preprocessing job is already running")]
    AlreadyRunning,

    #[error("Preprocessing failed: {0}")]
    Failed(String),
}

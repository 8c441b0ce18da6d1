//! Error types for stream decoding and container writing
//!
//! Every fallible operation in this crate returns `Result<T, StreamError>`.
//! Errors are grouped into the categories of [`ErrorKind`] so that callers can
//! decide whether a failure affects a single message, a single frame, a single
//! container write, or the whole process.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse error category
///
/// Only [`ErrorKind::Config`] is meant to terminate the process. All other
/// categories are local to one message, frame, parameter or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized message type, malformed JSON, unexpected part layout
    Protocol,
    /// Unsupported compression scheme or element type, size/shape mismatch
    Decode,
    /// Directory, file, link or container format failure
    Io,
    /// Parameter key not present in the mapping tables
    Mapping,
    /// Invalid startup configuration
    Config,
}

/// Stream writer error types
#[derive(Error, Debug)]
pub enum StreamError {
    /// A message part that must be JSON could not be parsed
    ///
    /// The whole message is skipped; nothing is dispatched.
    #[error("Malformed JSON in part {part}: {source}")]
    Json {
        /// Index of the offending part within the multipart message
        part: usize,
        /// Underlying parser error
        #[source]
        source: serde_json::Error,
    },

    /// The `htype` of part 0 does not start with a known prefix
    ///
    /// # Example
    /// ```no_run
    /// # use eiger_stream_rust::error::StreamError;
    /// let err = StreamError::UnknownMessageType("dfoo-1.0".to_string());
    /// ```
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// The number of parts does not match the message layout
    #[error("Invalid part count for {message} message: {actual}")]
    InvalidPartCount {
        /// Message kind name
        message: &'static str,
        /// Number of parts received
        actual: usize,
    },

    /// A required JSON field is missing
    #[error("Missing field '{field}' in part {part}")]
    MissingField {
        /// Index of the part
        part: usize,
        /// Field name
        field: &'static str,
    },

    /// Message is valid but not expected in the current series state
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Compression scheme tag is not supported
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Element type tag is not supported
    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(String),

    /// Decoded byte count does not match the declared shape
    ///
    /// # Example
    /// ```no_run
    /// # use eiger_stream_rust::error::StreamError;
    /// let err = StreamError::InvalidSize {
    ///     expected: 8192,
    ///     actual: 8190,
    /// };
    /// ```
    #[error("Invalid data size: expected {expected} bytes, got {actual}")]
    InvalidSize {
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes
        actual: usize,
    },

    /// Shape is not valid for the requested operation
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Compressed data is corrupt or truncated
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Parameter key is not present in the mapping tables
    #[error("Unknown parameter key: {0}")]
    UnknownParameter(String),

    /// An entry already exists at the target path
    #[error("Entry already exists: {0}")]
    EntryExists(String),

    /// No entry exists at the target path
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// A container file could not be parsed
    #[error("Invalid container {path}: {reason}")]
    InvalidContainer {
        /// File that failed to parse
        path: PathBuf,
        /// Description of the problem
        reason: String,
    },

    /// A data container was written but could not be linked into the master
    ///
    /// The data file stays on disk unlinked and must be reconciled out of band.
    #[error("Data container {file} written but not linked into master: {reason}")]
    LinkFailed {
        /// Orphaned data container file
        file: PathBuf,
        /// Why linking failed
        reason: String,
    },

    /// An operation needs a master container but none was created
    #[error("No master container for series {0}")]
    NoMaster(u64),

    /// Background writer for a series has stopped accepting commands
    #[error("Writer for series {0} is closed")]
    WriterClosed(u64),

    /// Invalid startup configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error while reading or writing container files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error while reading or writing container files
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl StreamError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Json { .. }
            | Self::UnknownMessageType(_)
            | Self::InvalidPartCount { .. }
            | Self::MissingField { .. }
            | Self::UnexpectedMessage(_) => ErrorKind::Protocol,
            Self::UnsupportedEncoding(_)
            | Self::UnsupportedElementType(_)
            | Self::InvalidSize { .. }
            | Self::InvalidShape(_)
            | Self::Decompression(_) => ErrorKind::Decode,
            Self::UnknownParameter(_) => ErrorKind::Mapping,
            Self::Config(_) => ErrorKind::Config,
            Self::EntryExists(_)
            | Self::EntryNotFound(_)
            | Self::InvalidContainer { .. }
            | Self::LinkFailed { .. }
            | Self::NoMaster(_)
            | Self::WriterClosed(_)
            | Self::Io(_) => ErrorKind::Io,
            #[cfg(feature = "storage_hdf5")]
            Self::Hdf5(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn json(part: usize, source: serde_json::Error) -> Self {
        Self::Json { part, source }
    }
}

/// Result type alias for stream writer operations
pub type Result<T> = std::result::Result<T, StreamError>;

//! Writer configuration
//!
//! Options use the camelCase names of the original configuration surface, so a
//! JSON configuration file looks like:
//!
//! ```json
//! {
//!     "basename": "lysozyme",
//!     "outputDirectory": "/data/run42",
//!     "imagesPerContainer": 100,
//!     "compressionScheme": "bslz4",
//!     "verbose": false
//! }
//! ```

use crate::compression::{CompressionLevel, ContainerCompression};
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension of master and data containers, decided by the storage backend
pub use crate::container::EXTENSION as CONTAINER_EXTENSION;

/// Default number of images per data container
pub const DEFAULT_IMAGES_PER_CONTAINER: usize = 100;

/// Default capacity of the per-series background command queue
///
/// Each queued chunk command holds up to `imagesPerContainer` decoded images,
/// so the default keeps at most four containers' worth of images waiting.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Configuration for container writing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriterConfig {
    /// File stem shared by master and data containers
    pub basename: String,
    /// Directory receiving all files
    pub output_directory: PathBuf,
    /// Buffering threshold: images per data container
    pub images_per_container: usize,
    /// Container-level compression, independent of wire compression
    pub compression_scheme: ContainerCompression,
    /// Diagnostic logging
    pub verbose: bool,
    /// Pending background commands per series before ingestion waits
    ///
    /// Memory held per series is bounded by [`WriterConfig::max_queued_images`]
    /// decoded images in the queue, plus the chunk being written and the
    /// images buffered for the next chunk.
    pub queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            basename: "eigerStream".to_string(),
            output_directory: PathBuf::from("."),
            images_per_container: DEFAULT_IMAGES_PER_CONTAINER,
            compression_scheme: ContainerCompression::default(),
            verbose: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WriterConfig {
    /// Create a configuration writing `basename_*` files into `output_directory`
    pub fn new(basename: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            basename: basename.into(),
            output_directory: output_directory.into(),
            ..Self::default()
        }
    }

    /// Set the buffering threshold
    pub fn with_images_per_container(mut self, images: usize) -> Self {
        self.images_per_container = images;
        self
    }

    /// Set the container compression
    pub fn with_compression(mut self, compression: ContainerCompression) -> Self {
        self.compression_scheme = compression;
        self
    }

    /// Enable diagnostic logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the per-series background queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Upper bound on decoded images waiting in one series writer's queue
    pub fn max_queued_images(&self) -> usize {
        self.queue_capacity.saturating_mul(self.images_per_container)
    }

    /// Parse a JSON configuration; missing options take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StreamError::Config(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StreamError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Check the configuration before any series is accepted
    ///
    /// This is the only check whose failure is meant to stop the process.
    pub fn validate(&self) -> Result<()> {
        if self.basename.is_empty() {
            return Err(StreamError::Config("basename must not be empty".to_string()));
        }
        if self.images_per_container == 0 {
            return Err(StreamError::Config(
                "imagesPerContainer must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(StreamError::Config(
                "queueCapacity must be at least 1".to_string(),
            ));
        }
        let meta = std::fs::metadata(&self.output_directory).map_err(|e| {
            StreamError::Config(format!(
                "output directory {} does not exist: {}",
                self.output_directory.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(StreamError::Config(format!(
                "output path {} is not a directory",
                self.output_directory.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(StreamError::Config(format!(
                "output directory {} is not writable",
                self.output_directory.display()
            )));
        }
        Ok(())
    }

    /// Compression level used for deflate and gzip chunks
    pub fn compression_level(&self) -> CompressionLevel {
        CompressionLevel::Default
    }

    /// `basename_<series>_master.<ext>`
    pub fn master_file_name(&self, series_id: u64) -> String {
        format!(
            "{}_{}_master.{}",
            self.basename, series_id, CONTAINER_EXTENSION
        )
    }

    /// `basename_<series>_data_<NNNNNN>.<ext>`
    pub fn data_file_name(&self, series_id: u64, index: u32) -> String {
        format!(
            "{}_{}_{}.{}",
            self.basename,
            series_id,
            data_entry_name(index),
            CONTAINER_EXTENSION
        )
    }

    /// Full path of the master container
    pub fn master_path(&self, series_id: u64) -> PathBuf {
        self.output_directory.join(self.master_file_name(series_id))
    }

    /// Full path of a data container
    pub fn data_path(&self, series_id: u64, index: u32) -> PathBuf {
        self.output_directory
            .join(self.data_file_name(series_id, index))
    }
}

/// `data_<NNNNNN>`, the link name inside the master and the data file suffix
pub fn data_entry_name(index: u32) -> String {
    format!("data_{:06}", index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.images_per_container, 100);
        assert_eq!(config.basename, "eigerStream");
        assert_eq!(config.compression_scheme, ContainerCompression::Bslz4);
        assert!(!config.verbose);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.max_queued_images(), 400);
    }

    #[test]
    fn test_queued_image_bound() {
        let config = WriterConfig::default()
            .with_images_per_container(1000)
            .with_queue_capacity(2);
        assert_eq!(config.max_queued_images(), 2000);
        let huge = WriterConfig::default().with_queue_capacity(usize::MAX);
        assert_eq!(huge.max_queued_images(), usize::MAX);
    }

    #[test]
    fn test_file_names() {
        let config = WriterConfig::new("sample", "/data");
        let ext = CONTAINER_EXTENSION;
        assert_eq!(config.master_file_name(7), format!("sample_7_master.{}", ext));
        assert_eq!(config.data_file_name(7, 12), format!("sample_7_data_000012.{}", ext));
        assert_eq!(
            config.data_path(7, 1),
            PathBuf::from(format!("/data/sample_7_data_000001.{}", ext))
        );
    }

    #[test]
    fn test_json_options() {
        let config = WriterConfig::from_json_str(
            r#"{"basename": "lyso", "imagesPerContainer": 25, "compressionScheme": "gzip", "verbose": true}"#,
        )
        .unwrap();
        assert_eq!(config.basename, "lyso");
        assert_eq!(config.images_per_container, 25);
        assert_eq!(config.compression_scheme, ContainerCompression::Gzip);
        assert!(config.verbose);
        assert_eq!(config.output_directory, PathBuf::from("."));

        assert!(WriterConfig::from_json_str(r#"{"compressionScheme": "lzf"}"#).is_err());
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig::new("s", dir.path());
        assert!(config.validate().is_ok());

        let missing = WriterConfig::new("s", dir.path().join("missing"));
        let err = missing.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);

        let zero = WriterConfig::new("s", dir.path()).with_images_per_container(0);
        assert!(zero.validate().is_err());
    }
}

//! EIGER detector stream writer in Rust
//!
//! This library turns the multipart message stream of an EIGER area detector
//! into a NeXus-style master container per series plus a sequence of data
//! containers holding the decoded images.
//!
//! # Features
//!
//! - **Typed stream messages** - Header, image and end-of-series messages parsed into distinct types
//! - **Payload decoding** - Bitshuffle+LZ4 and raw LZ4 blocks for 8, 16 and 32 bit pixels
//! - **Master / data containers** - Parameters mapped onto a fixed node tree, images chunked into linked data files
//! - **Background writing** - One writer task per series keeps file I/O off the ingestion path
//! - **Angle series** - Goniometer start/increment pairs expanded per image at end of series
//!
//! # Quick Start
//!
//! ```no_run
//! use eiger_stream_rust::config::WriterConfig;
//! use eiger_stream_rust::io::{MessageQueue, QueuePolicy, StreamPipeline};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> eiger_stream_rust::Result<()> {
//! eiger_stream_rust::logging::init_logging(false)?;
//!
//! let config = WriterConfig::from_file("writer.json")?;
//! let queue = Arc::new(MessageQueue::new(QueuePolicy::DropOldest { capacity: 256 }));
//!
//! // a transport task pushes every received multipart message:
//! // queue.enqueue(parts).await?;
//!
//! let mut pipeline = StreamPipeline::new(config)?;
//! pipeline.run(&queue).await;
//! let reports = pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **`protocol`** - Envelope classification, typed messages, dispatcher and a detector simulator
//! - **`codec`** - Payload decoders and encoders, including the bitshuffle transform
//! - **`array`** - Typed n-dimensional pixel arrays
//! - **`container`** - Storage backends, parameter mapping, master and data writers
//! - **`session`** - Series state machine, dropped frame count and angle series
//! - **`io`** - Message queue, ingestion pipeline and per-series writer tasks
//! - **`config`**, **`compression`**, **`logging`**, **`error`** - Ambient pieces
//!
//! # Output layout
//!
//! ```text
//! <basename>_<series>_master.<ext>
//!     entry/instrument/detector/...          mapped parameters
//!     entry/sample/goniometer/...            angle series
//!     entry/data/data_000001 -> <basename>_<series>_data_000001.<ext>:/entry/data/data
//! <basename>_<series>_data_000001.<ext>
//!     entry/data/data                        [images, height, width]
//! ```
//!
//! # Cargo features
//!
//! - **`storage_hdf5`** - Write HDF5 (`.h5`) containers with real external links
//!   through `hdf5-metno`. Without it containers use the built-in `.nxc` format.
//! - **`hdf5_static`** - Build libhdf5 from source instead of linking the system library
//! - **`hdf5_blosc`** - Blosc LZ4 filters for the `lz4` and `bslz4` schemes

pub mod array;
pub mod codec;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod io;
pub mod logging;
pub mod protocol;
pub mod session;

pub use array::{DataArray, ElementType};
pub use config::WriterConfig;
pub use error::{ErrorKind, Result, StreamError};
pub use io::StreamPipeline;

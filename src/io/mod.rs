//! Ingestion and background writing
//!
//! Messages flow from a [`MessageQueue`] into the [`StreamPipeline`], which
//! hands container writes to one [`SeriesWriter`] task per series.

pub mod message_queue;
pub mod pipeline;
pub mod writer_task;

pub use message_queue::{MessageQueue, Multipart, QueuePolicy, QueueStats};
pub use pipeline::{PipelineStats, StreamPipeline};
pub use writer_task::{SeriesWriter, WriteCommand, WriterReport};

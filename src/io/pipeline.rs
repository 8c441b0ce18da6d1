//! Ingestion pipeline
//!
//! [`StreamPipeline`] receives multipart messages in arrival order, keeps the
//! series session and hands container writes to the series writer task.
//! Errors of a single message are logged, counted and never stop the
//! pipeline.

use super::message_queue::MessageQueue;
use super::writer_task::{SeriesWriter, WriteCommand, WriterReport};
use crate::config::WriterConfig;
use crate::container::Value;
use crate::error::{ErrorKind, Result, StreamError};
use crate::protocol::{dispatch, ImageFrame, MessageKind, SeriesEnd, SeriesHeader, StreamHandler};
use crate::session::{Finalization, SeriesSession, SeriesStatistics};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Message and error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub headers: u64,
    pub images: u64,
    pub ends: u64,
    pub protocol_errors: u64,
    pub decode_errors: u64,
    pub io_errors: u64,
    /// Mapping and configuration errors
    pub other_errors: u64,
    /// Buffered images thrown away by a header arriving mid-series
    pub discarded_images: u64,
}

impl PipelineStats {
    pub fn messages(&self) -> u64 {
        self.headers + self.images + self.ends
    }

    pub fn errors(&self) -> u64 {
        self.protocol_errors + self.decode_errors + self.io_errors + self.other_errors
    }

    fn count_error(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Protocol => self.protocol_errors += 1,
            ErrorKind::Decode => self.decode_errors += 1,
            ErrorKind::Io => self.io_errors += 1,
            ErrorKind::Mapping | ErrorKind::Config => self.other_errors += 1,
        }
    }
}

/// Writer that no longer receives commands and is finishing its queue
struct Retiring {
    series_id: u64,
    handle: JoinHandle<Result<WriterReport>>,
}

/// Turns a stream of detector messages into master and data containers
///
/// # Examples
///
/// ```no_run
/// use eiger_stream_rust::config::WriterConfig;
/// use eiger_stream_rust::io::{MessageQueue, StreamPipeline};
///
/// # async fn example(queue: MessageQueue) -> eiger_stream_rust::error::Result<()> {
/// let mut pipeline = StreamPipeline::new(WriterConfig::new("eigerStream", "/data"))?;
/// pipeline.run(&queue).await;
/// for report in pipeline.shutdown().await {
///     println!("series {}: {} containers", report.series_id, report.data_containers.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamPipeline {
    config: WriterConfig,
    session: SeriesSession,
    writer: Option<SeriesWriter>,
    retired: Vec<Retiring>,
    reports: Vec<WriterReport>,
    completed: Vec<SeriesStatistics>,
    stats: PipelineStats,
}

impl StreamPipeline {
    /// Validate the configuration and build an idle pipeline
    ///
    /// This is the only fallible step that should stop a process.
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.validate()?;
        info!(
            basename = %config.basename,
            directory = %config.output_directory.display(),
            images_per_container = config.images_per_container,
            compression = config.compression_scheme.name(),
            max_queued_images = config.max_queued_images(),
            "Stream pipeline ready"
        );
        Ok(Self {
            session: SeriesSession::new(config.images_per_container),
            config,
            writer: None,
            retired: Vec::new(),
            reports: Vec::new(),
            completed: Vec::new(),
            stats: PipelineStats::default(),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn session(&self) -> &SeriesSession {
        &self.session
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Statistics of every series that reached its end message
    pub fn completed(&self) -> &[SeriesStatistics] {
        &self.completed
    }

    /// Handle one multipart message
    ///
    /// The error is returned for inspection only; it has already been logged
    /// and counted.
    pub async fn ingest(&mut self, parts: &[Bytes]) -> Result<MessageKind> {
        match dispatch(parts, self).await {
            Ok(kind) => Ok(kind),
            Err(e) => {
                self.stats.count_error(e.kind());
                warn!(
                    series = ?self.session.series_id(),
                    parts = parts.len(),
                    error = %e,
                    "Message dropped"
                );
                Err(e)
            }
        }
    }

    /// Ingest messages from `queue` until it is closed and drained
    ///
    /// Returns the number of messages handled without error.
    pub async fn run(&mut self, queue: &MessageQueue) -> u64 {
        let mut handled = 0;
        while let Some(parts) = queue.recv().await {
            if self.ingest(&parts).await.is_ok() {
                handled += 1;
            }
        }
        debug!(handled, "Message queue closed");
        handled
    }

    /// Close the current writer and wait for every writer task
    ///
    /// Returns one report per series writer, including writers of series that
    /// never received an end message.
    pub async fn shutdown(mut self) -> Vec<WriterReport> {
        if let Some(writer) = self.writer.take() {
            if self.session.is_open() {
                warn!(
                    series = writer.series_id(),
                    buffered = self.session.buffered(),
                    "Shutting down with an open series, buffered images discarded"
                );
            }
            self.retire(writer);
        }
        for retiring in std::mem::take(&mut self.retired) {
            collect(&mut self.reports, retiring.handle.await);
        }
        info!(
            messages = self.stats.messages(),
            errors = self.stats.errors(),
            series = self.reports.len(),
            "Stream pipeline stopped"
        );
        self.reports
    }

    fn retire(&mut self, writer: SeriesWriter) {
        let series_id = writer.series_id();
        self.retired.push(Retiring {
            series_id,
            handle: tokio::spawn(writer.finish()),
        });
    }

    async fn reap(&mut self) {
        let mut i = 0;
        while i < self.retired.len() {
            if self.retired[i].handle.is_finished() {
                let retiring = self.retired.swap_remove(i);
                collect(&mut self.reports, retiring.handle.await);
            } else {
                i += 1;
            }
        }
    }

    /// Wait for every earlier writer of `series_id` and mark its report superseded
    ///
    /// No two writers ever touch the same master: the new writer starts only
    /// after the old ones have drained. Returns the data containers of the
    /// earlier runs, or `None` if this id has not been written before.
    async fn settle(&mut self, series_id: u64) -> Option<Vec<PathBuf>> {
        if self.writer.as_ref().is_some_and(|w| w.series_id() == series_id) {
            if let Some(writer) = self.writer.take() {
                self.retire(writer);
            }
        }
        let (same, others): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|r| r.series_id == series_id);
        self.retired = others;
        if !same.is_empty() {
            debug!(series = series_id, writers = same.len(), "Waiting for earlier writers of series");
        }
        for retiring in same {
            collect(&mut self.reports, retiring.handle.await);
        }

        let mut earlier = self
            .reports
            .iter_mut()
            .filter(|r| r.series_id == series_id)
            .peekable();
        earlier.peek()?;
        let mut stale = Vec::new();
        for report in earlier.filter(|r| !r.superseded) {
            report.superseded = true;
            stale.extend(report.data_containers.iter().cloned());
        }
        Some(stale)
    }

    async fn send(&self, command: WriteCommand) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.send(command).await,
            None => Err(StreamError::WriterClosed(
                self.session.series_id().unwrap_or_default(),
            )),
        }
    }

    /// Open a series for an image that arrived without a header
    fn open_implicitly(&mut self, series_id: u64) {
        warn!(
            series = series_id,
            "Image without series header, data containers will not be linked"
        );
        self.session.open(series_id, None);
        if let Some(previous) = self.writer.take() {
            self.retire(previous);
        }
        self.writer = Some(SeriesWriter::spawn(self.config.clone(), series_id));
    }
}

fn collect(
    reports: &mut Vec<WriterReport>,
    joined: std::result::Result<Result<WriterReport>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(report)) => reports.push(report),
        Ok(Err(e)) => error!(error = %e, "Series writer did not finish"),
        Err(e) => error!(error = %e, "Series writer task failed"),
    }
}

impl StreamHandler for StreamPipeline {
    async fn on_header(&mut self, header: SeriesHeader) -> Result<()> {
        self.stats.headers += 1;
        self.reap().await;
        let series_id = header.series_id;
        let master_path = self.config.master_path(series_id);

        if let Some(abandoned) = self.session.open(series_id, Some(master_path.clone())) {
            warn!(
                series = abandoned.series_id,
                discarded = abandoned.buffered_images,
                images = abandoned.image_count,
                "New header before end of series, buffered images discarded"
            );
            self.stats.discarded_images += abandoned.buffered_images as u64;
        }
        let stale = self.settle(series_id).await;
        if let Some(previous) = self.writer.take() {
            self.retire(previous);
        }
        self.writer = Some(SeriesWriter::spawn(self.config.clone(), series_id));
        info!(
            series = series_id,
            detail = ?header.detail,
            master = %master_path.display(),
            "Series opened"
        );

        if let Some(appendix) = header.appendix_text() {
            debug!(series = series_id, %appendix, "Header appendix");
        }

        match stale {
            Some(stale) => {
                warn!(
                    series = series_id,
                    stale = stale.len(),
                    "Series id written before, starting over with a fresh master"
                );
                self.send(WriteCommand::ReplaceMaster { stale }).await?;
            }
            None => self.send(WriteCommand::CreateMaster).await?,
        }

        let mut parameters: Vec<(String, Value)> = header
            .config
            .into_iter()
            .flatten()
            .map(|(key, value)| (key, Value::from_json(value)))
            .collect();
        parameters.retain(|(key, _)| key != "compression");
        parameters.push((
            "compression".to_string(),
            Value::from(self.config.compression_scheme.name()),
        ));
        self.send(WriteCommand::Parameters(parameters)).await?;

        for table in header.corrections {
            debug!(
                series = series_id,
                table = table.kind.parameter_key(),
                shape = ?table.array.shape(),
                "Correction table received"
            );
            self.send(WriteCommand::Parameter {
                key: table.kind.parameter_key().to_string(),
                value: Value::Array(table.array),
            })
            .await?;
        }
        Ok(())
    }

    async fn on_image(&mut self, image: ImageFrame) -> Result<()> {
        self.stats.images += 1;
        if !self.session.is_open() {
            self.open_implicitly(image.series_id);
        } else if self.session.series_id() != Some(image.series_id) {
            warn!(
                series = ?self.session.series_id(),
                image_series = image.series_id,
                frame = image.frame_id,
                "Image belongs to a different series, stored with the open one"
            );
        }

        let array = image.decode().inspect_err(|e| {
            warn!(
                series = image.series_id,
                frame = image.frame_id,
                encoding = %image.info.encoding,
                error = %e,
                "Could not decode image"
            )
        })?;
        if let Some(timing) = &image.timing {
            trace!(
                series = image.series_id,
                frame = image.frame_id,
                real_time_ns = timing.real_time,
                "Frame timing"
            );
        }
        if let Some(appendix) = image.appendix_text() {
            debug!(series = image.series_id, frame = image.frame_id, %appendix, "Image appendix");
        }

        if let Some(chunk) = self.session.record_image(image.frame_id, array)? {
            trace!(
                series = image.series_id,
                index = chunk.index,
                images = chunk.images.len(),
                "Queueing data container"
            );
            self.send(WriteCommand::Chunk(chunk)).await?;
        }
        Ok(())
    }

    async fn on_end(&mut self, end: SeriesEnd) -> Result<()> {
        self.stats.ends += 1;
        if !self.session.is_open() {
            return Err(StreamError::UnexpectedMessage(format!(
                "end of series {:?} while no series is open",
                end.series_id
            )));
        }
        if let (Some(ended), Some(open)) = (end.series_id, self.session.series_id()) {
            if ended != open {
                warn!(series = open, end_series = ended, "End message names another series");
            }
        }

        let Finalization {
            series_id,
            remaining,
            frame_ids,
            statistics,
        } = self.session.begin_finalize()?;
        let mut result = match remaining {
            Some(chunk) => self.send(WriteCommand::Chunk(chunk)).await,
            None => Ok(()),
        };
        if result.is_ok() {
            result = self.send(WriteCommand::Finalize { frame_ids }).await;
        }

        info!(series = series_id, "{}", statistics);
        self.completed.push(statistics);
        if let Some(writer) = self.writer.take() {
            self.retire(writer);
        }
        self.session.reset();
        self.reap().await;
        result
    }
}

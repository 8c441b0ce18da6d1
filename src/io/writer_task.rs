//! Background writer task, one per series
//!
//! All container writes of a series go through one bounded command queue and
//! are applied in order by a single blocking task. The ingestion path only
//! waits when the queue is full.

use crate::config::WriterConfig;
use crate::container::{ContainerWriter, ParamOutcome, PendingChunk, Value};
use crate::error::{Result, StreamError};
use crate::session::AxisSeries;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work item for a series writer
#[derive(Debug)]
pub enum WriteCommand {
    /// Create or reuse the master container
    CreateMaster,
    /// Start the series over: delete `stale` data containers, write a fresh master
    ReplaceMaster { stale: Vec<PathBuf> },
    /// Several parameters, committed once
    Parameters(Vec<(String, Value)>),
    /// A single parameter
    Parameter { key: String, value: Value },
    /// Write and link one data container
    Chunk(PendingChunk),
    /// Derive angle series from the observed frame ids
    Finalize { frame_ids: Vec<u64> },
}

impl WriteCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateMaster => "create_master",
            Self::ReplaceMaster { .. } => "replace_master",
            Self::Parameters(_) => "parameters",
            Self::Parameter { .. } => "parameter",
            Self::Chunk(_) => "chunk",
            Self::Finalize { .. } => "finalize",
        }
    }
}

/// What a writer task did over its lifetime
#[derive(Debug, Clone, Default)]
pub struct WriterReport {
    pub series_id: u64,
    pub master_path: Option<PathBuf>,
    pub data_containers: Vec<PathBuf>,
    pub parameters_written: usize,
    pub parameters_skipped: usize,
    pub angles: Vec<AxisSeries>,
    /// One line per failed command
    pub failures: Vec<String>,
    /// A later header re-opened this series id and its files were replaced
    pub superseded: bool,
}

impl WriterReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Handle to the background writer of one series
#[derive(Debug)]
pub struct SeriesWriter {
    series_id: u64,
    tx: Option<mpsc::Sender<WriteCommand>>,
    handle: JoinHandle<WriterReport>,
}

impl SeriesWriter {
    /// Start the writer task; must be called inside a Tokio runtime
    pub fn spawn(config: WriterConfig, series_id: u64) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || run(config, series_id, rx));
        debug!(series = series_id, "Spawned series writer");
        Self {
            series_id,
            tx: Some(tx),
            handle,
        }
    }

    pub fn series_id(&self) -> u64 {
        self.series_id
    }

    /// Queue a command, waiting while the queue is full
    pub async fn send(&self, command: WriteCommand) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(StreamError::WriterClosed(self.series_id))?;
        tx.send(command)
            .await
            .map_err(|_| StreamError::WriterClosed(self.series_id))
    }

    /// Stop accepting commands; queued commands still run
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Close the queue and wait for every queued command to finish
    pub async fn finish(mut self) -> Result<WriterReport> {
        self.close();
        self.handle
            .await
            .map_err(|_| StreamError::WriterClosed(self.series_id))
    }
}

fn run(config: WriterConfig, series_id: u64, mut rx: mpsc::Receiver<WriteCommand>) -> WriterReport {
    let mut writer = ContainerWriter::new(config, series_id);
    let mut report = WriterReport {
        series_id,
        ..WriterReport::default()
    };

    while let Some(command) = rx.blocking_recv() {
        let name = command.name();
        if let Err(e) = apply(&mut writer, &mut report, command) {
            warn!(series = series_id, command = name, error = %e, "Write command failed");
            report.failures.push(format!("{}: {}", name, e));
        }
    }

    report.master_path = writer.master().map(|m| m.path().to_path_buf());
    report.data_containers = writer.data_files().to_vec();
    info!(
        series = series_id,
        containers = report.data_containers.len(),
        failures = report.failures.len(),
        "Series writer finished"
    );
    report
}

fn apply(writer: &mut ContainerWriter, report: &mut WriterReport, command: WriteCommand) -> Result<()> {
    match command {
        WriteCommand::CreateMaster => {
            writer.create_master()?;
        }
        WriteCommand::ReplaceMaster { stale } => {
            writer.replace_master(&stale)?;
        }
        WriteCommand::Parameters(entries) => {
            let total = entries.len();
            let written = writer.write_parameters(entries)?;
            report.parameters_written += written;
            report.parameters_skipped += total - written;
        }
        WriteCommand::Parameter { key, value } => match writer.write_parameter(&key, value)? {
            ParamOutcome::Written => report.parameters_written += 1,
            ParamOutcome::Skipped => report.parameters_skipped += 1,
        },
        WriteCommand::Chunk(chunk) => {
            writer.write_chunk(chunk)?;
        }
        WriteCommand::Finalize { frame_ids } => {
            report.angles = writer.finalize_angles(&frame_ids)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DataArray;

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig::new("w", dir.path()).with_queue_capacity(1);
        let writer = SeriesWriter::spawn(config, 9);

        writer.send(WriteCommand::CreateMaster).await.unwrap();
        writer
            .send(WriteCommand::Parameters(vec![
                ("omega_start".into(), Value::Float(1.0)),
                ("omega_increment".into(), Value::Float(0.1)),
                ("unknown_key".into(), Value::Int(1)),
            ]))
            .await
            .unwrap();
        for index in 1..=3 {
            let image = DataArray::from_vec(vec![2, 2], vec![index as u8; 4]).unwrap();
            writer
                .send(WriteCommand::Chunk(PendingChunk {
                    index,
                    first_image: index as u64,
                    images: vec![image],
                }))
                .await
                .unwrap();
        }
        writer
            .send(WriteCommand::Finalize {
                frame_ids: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let report = writer.finish().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.parameters_written, 2);
        assert_eq!(report.parameters_skipped, 1);
        assert_eq!(report.data_containers.len(), 3);
        assert!(report.data_containers[2]
            .ends_with(format!("w_9_data_000003.{}", crate::container::EXTENSION)));
        assert_eq!(report.angles.len(), 1);
        assert!(report.master_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SeriesWriter::spawn(WriterConfig::new("w", dir.path()), 1);
        // no master yet
        writer
            .send(WriteCommand::Parameter {
                key: "nimages".into(),
                value: Value::Int(1),
            })
            .await
            .unwrap();
        let report = writer.finish().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("parameter:"));
    }

    #[tokio::test]
    async fn test_replace_master_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig::new("w", dir.path());
        let stale = dir.path().join(format!("w_4_data_000001.{}", crate::container::EXTENSION));
        std::fs::write(&stale, b"left over").unwrap();

        let writer = SeriesWriter::spawn(config, 4);
        writer
            .send(WriteCommand::ReplaceMaster {
                stale: vec![stale.clone()],
            })
            .await
            .unwrap();
        let report = writer.finish().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(!stale.exists());
        assert!(report.master_path.unwrap().exists());
        assert!(!report.superseded);
    }

    #[tokio::test]
    async fn test_closed_writer_rejects_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SeriesWriter::spawn(WriterConfig::new("w", dir.path()), 3);
        writer.close();
        let err = writer.send(WriteCommand::CreateMaster).await.unwrap_err();
        assert!(matches!(err, StreamError::WriterClosed(3)));
    }
}

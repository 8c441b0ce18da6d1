//! Series session tracking
//!
//! One [`SeriesSession`] follows the currently open series on the ingestion
//! path: observed frame ids, image count, the image buffer and the start time.
//!
//! ```text
//! Idle --header--> Open --end--> Finalizing --reset--> Idle
//!                  Open --header--> Open   (previous series abandoned)
//! ```

pub mod angles;
pub mod stats;

use crate::array::DataArray;
use crate::container::{ImageBuffer, PendingChunk};
use crate::error::{Result, StreamError};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

pub use angles::{derive_axis, AxisSeries, GONIOMETER_AXES};
pub use stats::SeriesStatistics;

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    Idle,
    Open,
    Finalizing,
}

/// What was thrown away when a new header replaced an open series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonedSeries {
    pub series_id: u64,
    pub buffered_images: usize,
    pub image_count: u64,
}

/// Everything needed to close a series
#[derive(Debug)]
pub struct Finalization {
    pub series_id: u64,
    /// Remaining buffered images, if any
    pub remaining: Option<PendingChunk>,
    pub frame_ids: Vec<u64>,
    pub statistics: SeriesStatistics,
}

/// Number of ids in `[1, max)` that were never observed
///
/// The largest observed id itself is not part of the expected range.
pub fn dropped_frames(frame_ids: &[u64]) -> usize {
    let Some(&max) = frame_ids.iter().max() else {
        return 0;
    };
    let observed: HashSet<u64> = frame_ids.iter().copied().collect();
    (1..max).filter(|id| !observed.contains(id)).count()
}

/// State of the currently open series
#[derive(Debug)]
pub struct SeriesSession {
    images_per_container: usize,
    state: SeriesState,
    series_id: Option<u64>,
    master_path: Option<PathBuf>,
    frame_ids: Vec<u64>,
    image_count: u64,
    buffer: ImageBuffer,
    started_at: DateTime<Local>,
    started: Instant,
}

impl SeriesSession {
    pub fn new(images_per_container: usize) -> Self {
        Self {
            images_per_container,
            state: SeriesState::Idle,
            series_id: None,
            master_path: None,
            frame_ids: Vec::new(),
            image_count: 0,
            buffer: ImageBuffer::new(images_per_container),
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> SeriesState {
        self.state
    }

    pub fn series_id(&self) -> Option<u64> {
        self.series_id
    }

    pub fn is_open(&self) -> bool {
        self.state == SeriesState::Open
    }

    pub fn frame_ids(&self) -> &[u64] {
        &self.frame_ids
    }

    pub fn image_count(&self) -> u64 {
        self.image_count
    }

    /// Images buffered but not yet handed out as a chunk
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Start a series, resetting every per-series counter
    ///
    /// If a series was open, its unflushed images are discarded and described
    /// in the returned value.
    pub fn open(&mut self, series_id: u64, master_path: Option<PathBuf>) -> Option<AbandonedSeries> {
        let abandoned = match (self.state, self.series_id) {
            (SeriesState::Open, Some(previous)) => Some(AbandonedSeries {
                series_id: previous,
                buffered_images: self.buffer.discard(),
                image_count: self.image_count,
            }),
            _ => None,
        };
        self.reset();
        self.state = SeriesState::Open;
        self.series_id = Some(series_id);
        self.master_path = master_path;
        abandoned
    }

    /// Record one decoded image; returns a chunk when the buffer fills
    pub fn record_image(&mut self, frame_id: u64, image: DataArray) -> Result<Option<PendingChunk>> {
        if self.state != SeriesState::Open {
            return Err(StreamError::UnexpectedMessage(format!(
                "image {} while no series is open",
                frame_id
            )));
        }
        self.frame_ids.push(frame_id);
        self.image_count += 1;
        Ok(self.buffer.push(image))
    }

    /// Move to `Finalizing` and hand out the remaining buffer and statistics
    pub fn begin_finalize(&mut self) -> Result<Finalization> {
        let series_id = match (self.state, self.series_id) {
            (SeriesState::Open, Some(id)) => id,
            _ => {
                return Err(StreamError::UnexpectedMessage(
                    "end of series while no series is open".to_string(),
                ))
            }
        };
        self.state = SeriesState::Finalizing;
        let statistics = SeriesStatistics {
            series_id,
            master_path: self.master_path.clone(),
            image_count: self.image_count,
            dropped_frames: dropped_frames(&self.frame_ids),
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
        };
        Ok(Finalization {
            series_id,
            remaining: self.buffer.flush(),
            frame_ids: self.frame_ids.clone(),
            statistics,
        })
    }

    /// Back to `Idle` with all counters cleared
    pub fn reset(&mut self) {
        self.state = SeriesState::Idle;
        self.series_id = None;
        self.master_path = None;
        self.frame_ids.clear();
        self.image_count = 0;
        self.buffer = ImageBuffer::new(self.images_per_container);
        self.started_at = Local::now();
        self.started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> DataArray {
        DataArray::from_vec(vec![2, 2], vec![1u8; 4]).unwrap()
    }

    #[test]
    fn test_dropped_frames() {
        assert_eq!(dropped_frames(&[1, 2, 4, 5]), 1);
        assert_eq!(dropped_frames(&[1, 2, 3]), 0);
        assert_eq!(dropped_frames(&[]), 0);
        assert_eq!(dropped_frames(&[5]), 4);
        assert_eq!(dropped_frames(&[2, 1, 3]), 0);
    }

    #[test]
    fn test_lifecycle() {
        let mut session = SeriesSession::new(2);
        assert_eq!(session.state(), SeriesState::Idle);
        assert!(session.record_image(1, image()).is_err());

        assert!(session.open(4, None).is_none());
        assert!(session.record_image(1, image()).unwrap().is_none());
        let chunk = session.record_image(2, image()).unwrap().unwrap();
        assert_eq!(chunk.index, 1);
        session.record_image(4, image()).unwrap();

        let fin = session.begin_finalize().unwrap();
        assert_eq!(session.state(), SeriesState::Finalizing);
        assert_eq!(fin.series_id, 4);
        assert_eq!(fin.frame_ids, vec![1, 2, 4]);
        assert_eq!(fin.remaining.unwrap().index, 2);
        assert_eq!(fin.statistics.image_count, 3);
        assert_eq!(fin.statistics.dropped_frames, 1);

        session.reset();
        assert_eq!(session.state(), SeriesState::Idle);
        assert!(session.begin_finalize().is_err());
    }

    #[test]
    fn test_header_mid_series_discards_buffer() {
        let mut session = SeriesSession::new(10);
        session.open(1, None);
        for id in 1..=3 {
            session.record_image(id, image()).unwrap();
        }
        let abandoned = session.open(2, None).unwrap();
        assert_eq!(
            abandoned,
            AbandonedSeries {
                series_id: 1,
                buffered_images: 3,
                image_count: 3,
            }
        );
        assert_eq!(session.series_id(), Some(2));
        assert_eq!(session.image_count(), 0);
        assert_eq!(session.buffered(), 0);
        assert!(session.frame_ids().is_empty());

        let fin = session.begin_finalize().unwrap();
        assert!(fin.remaining.is_none());
    }
}

//! End-of-series statistics

use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Summary emitted when a series ends
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStatistics {
    pub series_id: u64,
    pub master_path: Option<PathBuf>,
    pub image_count: u64,
    pub dropped_frames: usize,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

impl fmt::Display for SeriesStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "series {}: {} images, {} dropped frames, started {}, elapsed {:.3}s",
            self.series_id,
            self.image_count,
            self.dropped_frames,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(master) = &self.master_path {
            write!(f, ", master {}", master.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = SeriesStatistics {
            series_id: 3,
            master_path: Some(PathBuf::from("/data/x_3_master.nxc")),
            image_count: 100,
            dropped_frames: 1,
            started_at: Local::now(),
            elapsed: Duration::from_millis(1500),
        };
        let text = stats.to_string();
        assert!(text.starts_with("series 3: 100 images, 1 dropped frames"));
        assert!(text.contains("elapsed 1.500s"));
        assert!(text.ends_with("master /data/x_3_master.nxc"));
    }
}

//! Series container writer
//!
//! [`ContainerWriter`] owns the master container of one series and writes its
//! data containers. It is synchronous: the pipeline runs it inside a blocking
//! background task, and it can be driven directly for offline conversion.
//!
//! The pipeline buffers images in its series session and hands finished
//! chunks to [`ContainerWriter::write_chunk`]. The writer's own buffer behind
//! [`ContainerWriter::buffer_image`] and [`ContainerWriter::flush`] serves
//! offline conversion only and stays empty under the pipeline.

use super::buffer::{ImageBuffer, PendingChunk};
use super::data::write_data_container;
use super::mapping::{self, DATA_GROUP, DATA_PATH};
use super::master::MasterContainer;
use super::node::Value;
use crate::array::DataArray;
use crate::config::{data_entry_name, WriterConfig};
use crate::error::{Result, StreamError};
use crate::session::angles::{axis_key, derive_axis, AxisSeries, GONIOMETER_AXES};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Outcome of a parameter write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOutcome {
    /// Value written at the mapped path
    Written,
    /// Key not in the mapping tables; nothing changed
    Skipped,
}

/// Writer for the containers of one series
#[derive(Debug)]
pub struct ContainerWriter {
    config: WriterConfig,
    series_id: u64,
    master: Option<MasterContainer>,
    buffer: ImageBuffer,
    data_files: Vec<PathBuf>,
}

impl ContainerWriter {
    pub fn new(config: WriterConfig, series_id: u64) -> Self {
        let buffer = ImageBuffer::new(config.images_per_container);
        Self {
            config,
            series_id,
            master: None,
            buffer,
            data_files: Vec::new(),
        }
    }

    pub fn series_id(&self) -> u64 {
        self.series_id
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Master container, if created
    pub fn master(&self) -> Option<&MasterContainer> {
        self.master.as_ref()
    }

    /// Data containers written so far, in index order
    pub fn data_files(&self) -> &[PathBuf] {
        &self.data_files
    }

    /// Create (or reuse) the master container of this series
    pub fn create_master(&mut self) -> Result<&MasterContainer> {
        let path = self.config.master_path(self.series_id);
        let master = MasterContainer::create(
            path,
            self.config.compression_scheme,
            self.config.compression_level(),
        )
        .inspect_err(|e| error!(series = self.series_id, error = %e, "Failed to create master container"))?;
        Ok(self.master.insert(master))
    }

    /// Start this series over with a fresh master
    ///
    /// Used when a header re-opens a series id that was already written. The
    /// `stale` data containers of the earlier run are deleted first so none of
    /// them can be mistaken for part of the new run.
    pub fn replace_master(&mut self, stale: &[PathBuf]) -> Result<&MasterContainer> {
        let series = self.series_id;
        for path in stale {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(series, path = %path.display(), "Removed stale data container"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    series,
                    path = %path.display(),
                    error = %e,
                    "Could not remove stale data container"
                ),
            }
        }
        let path = self.config.master_path(series);
        let master = MasterContainer::replace(
            path,
            self.config.compression_scheme,
            self.config.compression_level(),
        )
        .inspect_err(|e| error!(series, error = %e, "Failed to replace master container"))?;
        info!(series, stale = stale.len(), "Series restarted with a fresh master");
        Ok(self.master.insert(master))
    }

    fn master_mut(&mut self) -> Result<&mut MasterContainer> {
        self.master
            .as_mut()
            .ok_or(StreamError::NoMaster(self.series_id))
    }

    fn stage_parameter(&mut self, key: &str, value: Value) -> Result<ParamOutcome> {
        let series = self.series_id;
        let Some(spec) = mapping::lookup(key) else {
            warn!(series, key, "Parameter not in mapping tables, not written");
            return Ok(ParamOutcome::Skipped);
        };
        let kind = value.type_name();
        self.master_mut()?.insert(spec, value).inspect_err(|e| {
            warn!(series, key, path = spec.path, error = %e, "Could not write parameter")
        })?;
        debug!(series, key, path = spec.path, kind, "Wrote parameter");
        Ok(ParamOutcome::Written)
    }

    /// Write one parameter and commit the master
    ///
    /// Unknown keys are skipped with a warning. An existing entry at the mapped
    /// path is an error.
    pub fn write_parameter(&mut self, key: &str, value: impl Into<Value>) -> Result<ParamOutcome> {
        let outcome = self.stage_parameter(key, value.into())?;
        if outcome == ParamOutcome::Written {
            self.master_mut()?.commit()?;
            info!(series = self.series_id, key, "Wrote parameter to master");
        }
        Ok(outcome)
    }

    /// Write a batch of parameters with a single commit
    ///
    /// Individual failures are logged and do not stop the batch. Returns the
    /// number of entries written.
    pub fn write_parameters<I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let series = self.series_id;
        self.master_mut()?;
        let mut written = 0;
        for (key, value) in entries {
            if let Ok(ParamOutcome::Written) = self.stage_parameter(&key, value) {
                written += 1;
            }
        }
        let master = self.master_mut()?;
        master.commit()?;
        info!(
            series,
            written,
            path = %master.path().display(),
            "Wrote parameters to master"
        );
        Ok(written)
    }

    fn stage_delete(&mut self, key: &str) -> Result<bool> {
        let series = self.series_id;
        let Some(spec) = mapping::lookup(key) else {
            warn!(series, key, "Parameter not in mapping tables, not deleted");
            return Ok(false);
        };
        match self.master_mut()?.remove(spec.path) {
            Ok(()) => {
                debug!(series, key, path = spec.path, "Deleted parameter");
                Ok(true)
            }
            Err(e) => {
                warn!(series, key, path = spec.path, error = %e, "Could not delete parameter");
                Ok(false)
            }
        }
    }

    /// Delete a parameter and commit the master
    ///
    /// A missing key or path is a warning; returns whether anything was removed.
    pub fn delete_parameter(&mut self, key: &str) -> Result<bool> {
        let removed = self.stage_delete(key)?;
        if removed {
            self.master_mut()?.commit()?;
        }
        Ok(removed)
    }

    /// Current value of a parameter in the master
    pub fn read_parameter(&self, key: &str) -> Option<&Value> {
        let spec = mapping::lookup(key)?;
        self.master.as_ref()?.value(spec.path)
    }

    /// Buffer an image; writes a data container when the buffer fills
    ///
    /// For offline conversion. The streaming pipeline calls
    /// [`ContainerWriter::write_chunk`] with chunks it assembled itself.
    pub fn buffer_image(&mut self, image: DataArray) -> Result<Option<PathBuf>> {
        match self.buffer.push(image) {
            Some(chunk) => self.write_chunk(chunk).map(Some),
            None => Ok(None),
        }
    }

    /// Write whatever [`ContainerWriter::buffer_image`] buffered; no-op on an empty buffer
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        match self.buffer.flush() {
            Some(chunk) => self.write_chunk(chunk).map(Some),
            None => Ok(None),
        }
    }

    /// Write one chunk as a data container and link it into the master
    ///
    /// A write failure loses this chunk only. If the data container is written
    /// but linking fails, the file stays on disk and
    /// [`StreamError::LinkFailed`] names it.
    pub fn write_chunk(&mut self, chunk: PendingChunk) -> Result<PathBuf> {
        let series = self.series_id;
        let file_name = self.config.data_file_name(series, chunk.index);
        let path = self.config.data_path(series, chunk.index);
        let first = chunk.first_image;
        let last = chunk.last_image();

        let write = DataArray::stack(&chunk.images).and_then(|images| {
            let bits = images.dtype().bits();
            write_data_container(
                &path,
                images,
                first,
                last,
                self.config.compression_scheme,
                self.config.compression_level(),
            )
            .map(|()| bits)
        });
        let bits = match write {
            Ok(bits) => bits,
            Err(e) => {
                error!(
                    series,
                    index = chunk.index,
                    path = %path.display(),
                    error = %e,
                    "Failed to write data container, images lost"
                );
                return Err(e);
            }
        };
        info!(series, images = last + 1 - first, path = %path.display(), "Wrote data container");
        self.data_files.push(path.clone());

        let Some(master) = self.master.as_mut() else {
            warn!(series, path = %path.display(), "No master container, data container left unlinked");
            return Ok(path);
        };

        let link_path = format!("{}/{}", DATA_GROUP, data_entry_name(chunk.index));
        let linked = master
            .link(&link_path, &file_name, &format!("/{}", DATA_PATH))
            .and_then(|()| {
                if let Some(spec) = mapping::lookup("bit_depth_image") {
                    if !master.contains(spec.path) {
                        master.insert(spec, Value::Int(bits as i64))?;
                    }
                }
                master.commit()
            });
        if let Err(e) = linked {
            error!(
                series,
                file = %path.display(),
                error = %e,
                "Data container written but not linked into master"
            );
            return Err(StreamError::LinkFailed {
                file: path,
                reason: e.to_string(),
            });
        }
        debug!(series, link = %link_path, "Linked data container");
        Ok(path)
    }

    /// Expand goniometer start/increment pairs into per-image angle series
    ///
    /// For each axis with both values present, writes `<axis>`, `<axis>_end`,
    /// `<axis>_range_total` and `<axis>_range_average` (replacing earlier
    /// values) and deletes the start/increment placeholders. Axes without
    /// placeholders are skipped. Commits once.
    pub fn finalize_angles(&mut self, frame_ids: &[u64]) -> Result<Vec<AxisSeries>> {
        let series = self.series_id;
        self.master_mut()?;
        let mut derived = Vec::new();
        for axis in GONIOMETER_AXES {
            let start_key = axis_key(axis, "_start");
            let increment_key = axis_key(axis, "_increment");
            let start = self.read_parameter(&start_key).and_then(Value::as_f64);
            let increment = self.read_parameter(&increment_key).and_then(Value::as_f64);
            let (Some(start), Some(increment)) = (start, increment) else {
                debug!(series, axis, "No start/increment for axis, skipped");
                continue;
            };

            let angles = derive_axis(axis, start, increment, frame_ids);
            let mut entries = vec![(axis.to_string(), Value::FloatList(angles.values.clone()))];
            entries.extend(
                angles
                    .derived_entries()
                    .into_iter()
                    .map(|(key, value)| (key, Value::Float(value))),
            );
            for (key, value) in entries {
                if self.read_parameter(&key).is_some() {
                    self.stage_delete(&key)?;
                }
                if let Err(e) = self.stage_parameter(&key, value) {
                    warn!(series, key = %key, error = %e, "Could not write derived angle");
                }
            }
            self.stage_delete(&start_key)?;
            self.stage_delete(&increment_key)?;
            debug!(
                series,
                axis,
                start,
                end = angles.end(),
                images = frame_ids.len(),
                "Derived angle series"
            );
            derived.push(angles);
        }
        self.master_mut()?.commit()?;
        info!(series, axes = derived.len(), "Wrote angle series to master");
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::node::AttrValue;
    use crate::container::ContainerFile;

    fn writer(dir: &std::path::Path, per_container: usize) -> ContainerWriter {
        let config = WriterConfig::new("t", dir).with_images_per_container(per_container);
        ContainerWriter::new(config, 5)
    }

    fn image(v: u16) -> DataArray {
        DataArray::from_vec(vec![4, 3], vec![v; 12]).unwrap()
    }

    #[test]
    fn test_unknown_key_leaves_master_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 10);
        w.create_master().unwrap();
        let before = std::fs::read(w.config().master_path(5)).unwrap();

        let outcome = w.write_parameter("not_a_real_key", 1).unwrap();
        assert_eq!(outcome, ParamOutcome::Skipped);
        let after = std::fs::read(w.config().master_path(5)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_overwrite_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 10);
        w.create_master().unwrap();
        assert_eq!(w.write_parameter("nimages", 10).unwrap(), ParamOutcome::Written);
        let err = w.write_parameter("nimages", 11).unwrap_err();
        assert!(matches!(err, StreamError::EntryExists(_)));
        assert_eq!(w.read_parameter("nimages"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_parameter_without_master() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 10);
        let err = w.write_parameter("nimages", 1).unwrap_err();
        assert!(matches!(err, StreamError::NoMaster(5)));
    }

    #[test]
    fn test_delete_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 10);
        w.create_master().unwrap();
        w.write_parameter("omega_start", 1.0).unwrap();
        assert!(w.delete_parameter("omega_start").unwrap());
        assert!(!w.delete_parameter("omega_start").unwrap());
        assert!(!w.delete_parameter("bogus").unwrap());
        assert!(w.read_parameter("omega_start").is_none());
    }

    #[test]
    fn test_buffering_and_linking() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 3);
        w.create_master().unwrap();
        for i in 0..7 {
            w.buffer_image(image(i)).unwrap();
        }
        assert_eq!(w.data_files().len(), 2);
        assert!(w.flush().unwrap().is_some());
        assert!(w.flush().unwrap().is_none());
        assert_eq!(w.data_files().len(), 3);

        let master = ContainerFile::open(w.config().master_path(5)).unwrap();
        let last = master.read_linked("entry/data/data_000003").unwrap();
        assert_eq!(last.as_array().unwrap().shape(), &[1, 4, 3]);
        assert_eq!(
            master.read_value("entry/instrument/detector/bit_depth_image").unwrap(),
            &Value::Int(16)
        );

        let (second, _) = master.resolve_link("entry/data/data_000002").unwrap();
        let attrs = second.attrs(DATA_PATH).unwrap();
        assert_eq!(attrs.get("image_nr_low"), Some(&AttrValue::Int(4)));
        assert_eq!(attrs.get("image_nr_high"), Some(&AttrValue::Int(6)));
    }

    #[test]
    fn test_chunk_without_master_is_written_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1);
        let path = w.buffer_image(image(1)).unwrap().unwrap();
        assert!(path.exists());
        assert!(!w.config().master_path(5).exists());
    }

    #[test]
    fn test_existing_data_file_loses_chunk_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1);
        w.create_master().unwrap();
        std::fs::write(w.config().data_path(5, 1), b"occupied").unwrap();

        assert!(w.buffer_image(image(1)).is_err());
        assert!(w.buffer_image(image(2)).unwrap().is_some());
        assert_eq!(w.data_files(), &[w.config().data_path(5, 2)]);
    }

    #[test]
    fn test_link_failure_names_orphaned_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 1);
        w.create_master().unwrap();
        let master_path = w.config().master_path(5);
        std::fs::remove_file(&master_path).unwrap();
        std::fs::create_dir(&master_path).unwrap();

        let err = w.buffer_image(image(3)).unwrap_err();
        let StreamError::LinkFailed { file, .. } = &err else {
            panic!("expected LinkFailed, got {:?}", err);
        };
        assert_eq!(file, &w.config().data_path(5, 1));
        assert!(file.exists());
        assert_eq!(w.data_files(), &[w.config().data_path(5, 1)]);

        let data = ContainerFile::open(file).unwrap();
        assert_eq!(
            data.read_value(DATA_PATH).unwrap().as_array().unwrap().to_vec::<u16>().unwrap(),
            vec![3u16; 12]
        );
    }

    #[test]
    fn test_replace_master_drops_earlier_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 2);
        w.create_master().unwrap();
        w.write_parameter("nimages", 4).unwrap();
        for i in 0..4 {
            w.buffer_image(image(i)).unwrap();
        }
        let stale = w.data_files().to_vec();
        assert_eq!(stale.len(), 2);

        let mut again = writer(dir.path(), 2);
        again.replace_master(&stale).unwrap();
        assert!(stale.iter().all(|p| !p.exists()));
        assert!(again.read_parameter("nimages").is_none());

        let master = ContainerFile::open(w.config().master_path(5)).unwrap();
        assert!(master.node("entry/data/data_000001").is_none());
        assert!(master.node("entry/instrument/detector").is_some());
        // already gone is fine
        again.replace_master(&stale).unwrap();
    }

    #[test]
    fn test_finalize_angles() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path(), 10);
        w.create_master().unwrap();
        w.write_parameter("omega_start", 10.0).unwrap();
        w.write_parameter("omega_increment", 0.5).unwrap();
        w.write_parameter("omega_end", 99.0).unwrap();

        let derived = w.finalize_angles(&[0, 1, 2]).unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(
            w.read_parameter("omega"),
            Some(&Value::FloatList(vec![10.0, 10.5, 11.0]))
        );
        assert_eq!(w.read_parameter("omega_end"), Some(&Value::Float(11.0)));
        assert_eq!(w.read_parameter("omega_range_total"), Some(&Value::Float(1.0)));
        assert_eq!(w.read_parameter("omega_range_average"), Some(&Value::Float(0.5)));
        assert!(w.read_parameter("omega_start").is_none());
        assert!(w.read_parameter("omega_increment").is_none());
        assert!(w.read_parameter("phi").is_none());
    }
}

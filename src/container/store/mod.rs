//! Container storage backends
//!
//! With the `storage_hdf5` feature, master and data containers are HDF5 files
//! with real external links. Without it they use the crate's own `.nxc`
//! format, which stores the same tree. Both backends provide:
//!
//! - [`EXTENSION`]: file extension of every container
//! - [`load`]: read a whole file into a [`Group`] tree
//! - [`write_tree`]: write a tree as a complete file at a path
//! - [`MasterStore`]: apply staged [`Change`]s to an existing master in place

use super::node::{normalize_path, Group};
use crate::compression::{CompressionLevel, ContainerCompression};
use crate::error::{Result, StreamError};
use std::path::Path;
use tracing::trace;

#[cfg(feature = "storage_hdf5")]
mod h5;
#[cfg(feature = "storage_hdf5")]
pub use h5::{load, write_tree, MasterStore, EXTENSION};

#[cfg(not(feature = "storage_hdf5"))]
mod nxc;
#[cfg(not(feature = "storage_hdf5"))]
pub use nxc::{load, write_tree, MasterStore, EXTENSION};

/// One staged master mutation
///
/// Changes are applied in the order they were staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The node at this path is new: write it (for a group, its attributes)
    Write(String),
    /// Unlink whatever lives at this path
    Remove(String),
}

impl Change {
    pub fn write(path: &str) -> Self {
        Self::Write(normalize_path(path))
    }

    pub fn remove(path: &str) -> Self {
        Self::Remove(normalize_path(path))
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Write(path) | Self::Remove(path) => path,
        }
    }

    /// True if `path` is this change's path or lies below it
    pub fn covers(&self, path: &str) -> bool {
        let own = self.path();
        path == own
            || (path.len() > own.len() && path.starts_with(own) && path.as_bytes()[own.len()] == b'/')
    }
}

/// Chunk shape used for an array of the given shape
///
/// Arrays with three or more dimensions get one image (one index of the
/// leading axis) per chunk; smaller arrays are a single chunk.
pub fn chunk_shape(shape: &[usize]) -> Vec<usize> {
    let mut chunk = shape.to_vec();
    if chunk.len() >= 3 {
        chunk[0] = 1;
    }
    chunk
}

/// Write `root` as a new container at `path`
///
/// The file is written under a unique temporary name in the same directory
/// and renamed into place, so concurrent writers never share a temporary
/// file and readers never see a partial container. With `replace == false`
/// an existing file is left alone and [`StreamError::EntryExists`] returned.
pub fn write_new(
    path: &Path,
    root: &Group,
    compression: ContainerCompression,
    level: CompressionLevel,
    replace: bool,
) -> Result<()> {
    let exists = || StreamError::EntryExists(path.display().to_string());
    if !replace && path.exists() {
        return Err(exists());
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default()
    );
    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?
        .into_temp_path();

    write_tree(&temp, root, compression, level)?;

    let persisted = if replace {
        temp.persist(path)
    } else {
        temp.persist_noclobber(path)
    };
    persisted.map_err(|e| match e.error.kind() {
        std::io::ErrorKind::AlreadyExists => exists(),
        _ => StreamError::Io(e.error),
    })?;
    trace!(path = %path.display(), "Container written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DataArray;
    use crate::container::node::{Dataset, Node, Value};
    use std::sync::Arc;

    fn tree(fill: u16) -> Group {
        let mut root = Group::new();
        root.ensure_group("entry").unwrap().set_attr("NX_class", "NXentry");
        let images = DataArray::from_vec(vec![2, 3, 4], vec![fill; 24]).unwrap();
        root.insert("entry/data/data", Node::Dataset(Dataset::new(Value::Array(images))))
            .unwrap();
        root
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_change_covers_descendants() {
        let change = Change::remove("/entry/sample/");
        assert_eq!(change.path(), "entry/sample");
        assert!(change.covers("entry/sample"));
        assert!(change.covers("entry/sample/goniometer/omega"));
        assert!(!change.covers("entry/samples"));
        assert!(!change.covers("entry"));
    }

    #[test]
    fn test_chunk_shape() {
        assert_eq!(chunk_shape(&[5, 10, 20]), vec![1, 10, 20]);
        assert_eq!(chunk_shape(&[10, 20]), vec![10, 20]);
        assert_eq!(chunk_shape(&[7]), vec![7]);
    }

    #[test]
    fn test_write_new_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("s_1_data_000001.{}", EXTENSION));
        let level = CompressionLevel::Default;
        write_new(&path, &tree(1), ContainerCompression::Bslz4, level, false).unwrap();

        let err = write_new(&path, &tree(2), ContainerCompression::Bslz4, level, false).unwrap_err();
        assert!(matches!(err, StreamError::EntryExists(_)));
        assert_eq!(load(&path).unwrap(), tree(1));

        write_new(&path, &tree(3), ContainerCompression::None, level, true).unwrap();
        assert_eq!(load(&path).unwrap(), tree(3));
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_concurrent_writers_use_distinct_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join(format!("s_1_master.{}", EXTENSION)));
        let writers: Vec<_> = (0..4u16)
            .map(|fill| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        write_new(
                            &path,
                            &tree(fill),
                            ContainerCompression::Lz4,
                            CompressionLevel::Fast,
                            true,
                        )?;
                    }
                    Ok::<_, StreamError>(())
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        let loaded = load(&path).unwrap();
        assert!((0..4).any(|fill| loaded == tree(fill)));
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("m");
        let err = write_new(
            &path,
            &tree(0),
            ContainerCompression::None,
            CompressionLevel::Default,
            true,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}

//! Read-only access to written containers

use super::node::{Attributes, ExternalLink, Group, Node, Value};
use super::store;
use crate::error::{Result, StreamError};
use std::path::{Path, PathBuf};

/// Read-only view of a container file
///
/// # Examples
///
/// ```no_run
/// use eiger_stream_rust::container::{ContainerFile, EXTENSION};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let master = ContainerFile::open(format!("/data/sample_1_master.{}", EXTENSION))?;
/// let omega = master.read_value("entry/sample/goniometer/omega")?;
/// let images = master.read_linked("entry/data/data_000001")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContainerFile {
    path: PathBuf,
    root: Group,
}

impl ContainerFile {
    /// Open and fully decode a container
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = store::load(&path)?;
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Node at `path`
    pub fn node(&self, path: &str) -> Option<&Node> {
        self.root.get(path)
    }

    /// Dataset value at `path`
    pub fn read_value(&self, path: &str) -> Result<&Value> {
        self.root
            .dataset(path)
            .map(|d| &d.value)
            .ok_or_else(|| StreamError::EntryNotFound(path.to_string()))
    }

    /// Attributes of the group or dataset at `path`
    pub fn attrs(&self, path: &str) -> Result<&Attributes> {
        match self.root.get(path) {
            Some(Node::Group(g)) => Ok(&g.attrs),
            Some(Node::Dataset(d)) => Ok(&d.attrs),
            _ => Err(StreamError::EntryNotFound(path.to_string())),
        }
    }

    /// External link stored at `path`
    pub fn link(&self, path: &str) -> Result<&ExternalLink> {
        match self.root.get(path) {
            Some(Node::Link(link)) => Ok(link),
            _ => Err(StreamError::EntryNotFound(path.to_string())),
        }
    }

    /// Open the file an external link points to
    ///
    /// The link's file name is resolved against this container's directory.
    pub fn resolve_link(&self, path: &str) -> Result<(ContainerFile, String)> {
        let link = self.link(path)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let target = ContainerFile::open(dir.join(&link.file))?;
        Ok((target, link.path.clone()))
    }

    /// Follow an external link and read the dataset it names
    pub fn read_linked(&self, path: &str) -> Result<Value> {
        let (target, inner) = self.resolve_link(path)?;
        target.read_value(&inner).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DataArray;
    use crate::compression::{CompressionLevel, ContainerCompression};
    use crate::container::node::Dataset;
    use crate::container::store::{write_tree, EXTENSION};

    #[test]
    fn test_follow_link() {
        let dir = tempfile::tempdir().unwrap();
        let data_name = format!("x_data_000001.{}", EXTENSION);
        let mut data = Group::new();
        let images = DataArray::from_vec(vec![2, 2, 2], vec![1u32; 8]).unwrap();
        data.insert("entry/data/data", Node::Dataset(Dataset::new(images.clone().into())))
            .unwrap();
        write_tree(
            &dir.path().join(&data_name),
            &data,
            ContainerCompression::Bslz4,
            CompressionLevel::Default,
        )
        .unwrap();

        let mut root = Group::new();
        root.ensure_group("entry").unwrap().set_attr("NX_class", "NXentry");
        root.insert("entry/sample/name", Node::Dataset(Dataset::new("lysozyme".into())))
            .unwrap();
        root.insert(
            "entry/data/data_000001",
            Node::Link(ExternalLink {
                file: data_name,
                path: "/entry/data/data".into(),
            }),
        )
        .unwrap();
        let master_path = dir.path().join(format!("x_master.{}", EXTENSION));
        write_tree(&master_path, &root, ContainerCompression::Bslz4, CompressionLevel::Default)
            .unwrap();

        let master = ContainerFile::open(&master_path).unwrap();
        assert_eq!(
            master.read_value("entry/sample/name").unwrap().as_str(),
            Some("lysozyme")
        );
        assert_eq!(master.attrs("entry").unwrap().len(), 1);
        let linked = master.read_linked("/entry/data/data_000001").unwrap();
        assert_eq!(linked.as_array(), Some(&images));
        assert!(master.read_value("entry/missing").is_err());
        assert!(master.link("entry/sample/name").is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ContainerFile::open(dir.path().join("nope")).is_err());
    }
}

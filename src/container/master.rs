//! Per-series master container

use super::mapping::{NodeSpec, NX_NODES};
use super::node::{AttrValue, Dataset, ExternalLink, Group, Node, Value};
use super::store::{Change, MasterStore};
use crate::compression::{CompressionLevel, ContainerCompression};
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Master container of one series
///
/// Mutations are staged in memory and recorded as [`Change`]s;
/// [`MasterContainer::commit`] applies only those changes to the file.
#[derive(Debug)]
pub struct MasterContainer {
    root: Group,
    store: MasterStore,
    pending: Vec<Change>,
}

fn structural_tree(root: &mut Group) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    for spec in NX_NODES {
        let existed = root.contains(spec.path);
        let group = root.ensure_group(spec.path)?;
        let before = group.attrs.clone();
        for (name, value) in spec.attrs {
            group.set_attr(name, *value);
        }
        if !existed || group.attrs != before {
            changes.push(Change::write(spec.path));
        }
    }
    Ok(changes)
}

impl MasterContainer {
    /// Create the master at `path`, or reuse the one already there
    ///
    /// Every structural node is (re-)created with its class attributes. Calling
    /// this twice for the same path leaves one copy of each node and attribute.
    pub fn create(
        path: impl Into<PathBuf>,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Self::replace(path, compression, level);
        }

        debug!(path = %path.display(), "Reusing existing master container");
        let (store, mut root) = MasterStore::open(&path, compression, level)?;
        let pending = structural_tree(&mut root)?;
        let mut master = Self {
            root,
            store,
            pending,
        };
        master.commit()?;
        Ok(master)
    }

    /// Start a fresh master at `path`, discarding any file already there
    pub fn replace(
        path: impl Into<PathBuf>,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<Self> {
        let path = path.into();
        let mut root = Group::new();
        structural_tree(&mut root)?;
        let store = MasterStore::create(&path, &root, compression, level)?;
        info!(path = %path.display(), "Wrote master container");
        Ok(Self {
            root,
            store,
            pending: Vec::new(),
        })
    }

    /// Open an existing master without touching it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (store, root) = MasterStore::open(
            &path,
            ContainerCompression::default(),
            CompressionLevel::default(),
        )?;
        Ok(Self {
            root,
            store,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn contains(&self, path: &str) -> bool {
        self.root.contains(path)
    }

    /// Dataset value at `path`
    pub fn value(&self, path: &str) -> Option<&Value> {
        self.root.dataset(path).map(|d| &d.value)
    }

    /// Number of staged, uncommitted changes
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Stage a new dataset at the mapped path with the mapped attributes
    ///
    /// Fails with `EntryExists` if anything already lives at that path.
    pub fn insert(&mut self, spec: &NodeSpec, value: Value) -> Result<()> {
        let mut dataset = Dataset::new(value);
        for (name, attr) in spec.attrs {
            dataset
                .attrs
                .insert(name.to_string(), AttrValue::from(*attr));
        }
        self.root.insert(spec.path, Node::Dataset(dataset))?;
        self.pending.push(Change::write(spec.path));
        Ok(())
    }

    /// Stage removal of the node at `path`
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.root.remove(path)?;
        self.pending.push(Change::remove(path));
        Ok(())
    }

    /// Stage an external link at `path` to `target` inside `file`
    pub fn link(&mut self, path: &str, file: &str, target: &str) -> Result<()> {
        self.root.insert(
            path,
            Node::Link(ExternalLink {
                file: file.to_string(),
                path: target.to_string(),
            }),
        )?;
        self.pending.push(Change::write(path));
        Ok(())
    }

    /// Write the staged changes to disk
    ///
    /// Changes are consumed even when writing fails.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let changes = std::mem::take(&mut self.pending);
        self.store.apply(&self.root, &changes)
    }
}

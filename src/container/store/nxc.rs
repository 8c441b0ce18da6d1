//! `.nxc` container files
//!
//! A fixed header, the compressed chunks of every array, and a JSON index
//! describing the node tree at the end of the file:
//!
//! ```text
//! 0..4     magic "NXCF"
//! 4..6     format version             (u16, big-endian)
//! 6..8     reserved, zero
//! 8..16    index offset in bytes      (u64, big-endian)
//! 16..24   index length in bytes      (u64, big-endian)
//! 24..     array chunks, each compressed independently
//! ..       JSON index, chunk offsets absolute
//! ```
//!
//! Keeping the index last lets a master grow in place: a commit writes only
//! the chunks of new arrays plus a fresh index over the old one, then
//! rewrites the header. Chunks of unchanged arrays are never re-encoded.

use super::{chunk_shape, Change};
use crate::array::{element_count, DataArray, ElementType};
use crate::compression::{compress, decompress, CompressionLevel, ContainerCompression};
use crate::container::node::{Attributes, Dataset, ExternalLink, Group, Node, Value};
use crate::error::{Result, StreamError};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// File extension of `.nxc` containers
pub const EXTENSION: &str = "nxc";

/// File magic
pub const MAGIC: [u8; 4] = *b"NXCF";

/// Current format version
pub const FORMAT_VERSION: u16 = 2;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 24;

/// Location of one compressed chunk in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub offset: u64,
    pub length: u64,
}

/// Storage description of an array dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub dtype: ElementType,
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    pub compression: ContainerCompression,
    pub chunks: Vec<ChunkRef>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum StoredValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    Json(serde_json::Value),
    Array(ArrayLayout),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IndexNode {
    Group {
        #[serde(default)]
        attrs: Attributes,
        #[serde(default)]
        children: BTreeMap<String, IndexNode>,
    },
    Dataset {
        #[serde(default)]
        attrs: Attributes,
        value: StoredValue,
    },
    ExternalLink(ExternalLink),
}

fn child_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Builds an index, appending new chunks after `base`
struct Encoder {
    base: u64,
    chunks: BytesMut,
    compression: ContainerCompression,
    level: CompressionLevel,
    reused: HashMap<String, ArrayLayout>,
    layouts: HashMap<String, ArrayLayout>,
}

impl Encoder {
    fn new(base: u64, compression: ContainerCompression, level: CompressionLevel) -> Self {
        Self {
            base,
            chunks: BytesMut::new(),
            compression,
            level,
            reused: HashMap::new(),
            layouts: HashMap::new(),
        }
    }

    fn end(&self) -> u64 {
        self.base + self.chunks.len() as u64
    }

    fn group(&mut self, group: &Group, prefix: &str) -> Result<IndexNode> {
        let mut children = BTreeMap::new();
        for (name, node) in &group.children {
            let path = child_path(prefix, name);
            let child = match node {
                Node::Group(g) => self.group(g, &path)?,
                Node::Dataset(d) => IndexNode::Dataset {
                    attrs: d.attrs.clone(),
                    value: self.value(&d.value, &path)?,
                },
                Node::Link(link) => IndexNode::ExternalLink(link.clone()),
            };
            children.insert(name.clone(), child);
        }
        Ok(IndexNode::Group {
            attrs: group.attrs.clone(),
            children,
        })
    }

    fn value(&mut self, value: &Value, path: &str) -> Result<StoredValue> {
        Ok(match value {
            Value::Bool(b) => StoredValue::Bool(*b),
            Value::Int(i) => StoredValue::Int(*i),
            Value::Float(f) => StoredValue::Float(*f),
            Value::Text(s) => StoredValue::Text(s.clone()),
            Value::IntList(v) => StoredValue::IntList(v.clone()),
            Value::FloatList(v) => StoredValue::FloatList(v.clone()),
            Value::Json(j) => StoredValue::Json(j.clone()),
            Value::Array(a) => StoredValue::Array(self.array(a, path)?),
        })
    }

    fn array(&mut self, array: &DataArray, path: &str) -> Result<ArrayLayout> {
        if let Some(layout) = self.reused.remove(path) {
            if layout.dtype == array.dtype() && layout.shape == array.shape() {
                self.layouts.insert(path.to_string(), layout.clone());
                return Ok(layout);
            }
        }

        let chunk_shape = chunk_shape(array.shape());
        let chunk_bytes = element_count(&chunk_shape)? * array.dtype().size();
        let mut chunks = Vec::new();
        if chunk_bytes > 0 {
            for raw in array.as_bytes().chunks(chunk_bytes) {
                let compressed = compress(raw, self.compression, self.level, array.dtype().size())?;
                chunks.push(ChunkRef {
                    offset: self.end(),
                    length: compressed.len() as u64,
                });
                self.chunks.put_slice(&compressed);
            }
        }
        let layout = ArrayLayout {
            dtype: array.dtype(),
            shape: array.shape().to_vec(),
            chunk_shape,
            compression: self.compression,
            chunks,
        };
        self.layouts.insert(path.to_string(), layout.clone());
        Ok(layout)
    }

    /// New chunks followed by the index; returns the bytes and the index position
    fn finish(self, root: IndexNode) -> Result<(BytesMut, u64, u64)> {
        let index = serde_json::to_vec(&root).map_err(std::io::Error::from)?;
        let index_offset = self.end();
        let mut tail = self.chunks;
        tail.put_slice(&index);
        Ok((tail, index_offset, index.len() as u64))
    }
}

fn header(index_offset: u64, index_len: u64) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut buf = &mut out[..];
    buf.put_slice(&MAGIC);
    buf.put_u16(FORMAT_VERSION);
    buf.put_u16(0);
    buf.put_u64(index_offset);
    buf.put_u64(index_len);
    out
}

/// Serialize a tree into container bytes
pub fn encode(
    root: &Group,
    compression: ContainerCompression,
    level: CompressionLevel,
) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(HEADER_SIZE as u64, compression, level);
    let index = encoder.group(root, "")?;
    let (tail, index_offset, index_len) = encoder.finish(index)?;

    let mut out = BytesMut::with_capacity(HEADER_SIZE + tail.len());
    out.put_slice(&header(index_offset, index_len));
    out.put_slice(&tail);
    Ok(out.to_vec())
}

/// Write `root` as a complete container at `path`, truncating any file there
pub fn write_tree(
    path: &Path,
    root: &Group,
    compression: ContainerCompression,
    level: CompressionLevel,
) -> Result<()> {
    let data = encode(root, compression, level)?;
    let mut file = File::create(path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    trace!(path = %path.display(), bytes = data.len(), "Container encoded");
    Ok(())
}

struct Decoded {
    root: Group,
    index_offset: u64,
    layouts: HashMap<String, ArrayLayout>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> StreamError {
    StreamError::InvalidContainer {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn decode_full(path: &Path, data: &[u8]) -> Result<Decoded> {
    if data.len() < HEADER_SIZE {
        return Err(invalid(path, format!("file too short: {} bytes", data.len())));
    }
    let mut head = &data[..HEADER_SIZE];
    let mut magic = [0u8; 4];
    head.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(invalid(path, "bad magic"));
    }
    let version = head.get_u16();
    if version != FORMAT_VERSION {
        return Err(invalid(path, format!("unsupported format version {}", version)));
    }
    let _reserved = head.get_u16();
    let index_offset = head.get_u64();
    let index_len = head.get_u64();

    let start = usize::try_from(index_offset)
        .ok()
        .filter(|&start| start >= HEADER_SIZE);
    let range = start.and_then(|start| {
        let end = start.checked_add(usize::try_from(index_len).ok()?)?;
        (end <= data.len()).then_some(start..end)
    });
    let range = range.ok_or_else(|| {
        invalid(
            path,
            format!("index at {} (+{}) exceeds file", index_offset, index_len),
        )
    })?;
    let index: IndexNode = serde_json::from_slice(&data[range.clone()])
        .map_err(|e| invalid(path, format!("bad index: {}", e)))?;

    let mut layouts = HashMap::new();
    let chunks = &data[..range.start];
    match restore(index, chunks, "", &mut layouts).map_err(|e| invalid(path, e.to_string()))? {
        Node::Group(root) => Ok(Decoded {
            root,
            index_offset,
            layouts,
        }),
        _ => Err(invalid(path, "root is not a group")),
    }
}

/// Parse container bytes; `path` is only used in error messages
pub fn decode(path: &Path, data: &[u8]) -> Result<Group> {
    decode_full(path, data).map(|decoded| decoded.root)
}

fn restore(
    node: IndexNode,
    data: &[u8],
    prefix: &str,
    layouts: &mut HashMap<String, ArrayLayout>,
) -> Result<Node> {
    Ok(match node {
        IndexNode::Group { attrs, children } => {
            let mut group = Group {
                attrs,
                children: BTreeMap::new(),
            };
            for (name, child) in children {
                let path = child_path(prefix, &name);
                group.children.insert(name, restore(child, data, &path, layouts)?);
            }
            Node::Group(group)
        }
        IndexNode::Dataset { attrs, value } => Node::Dataset(Dataset {
            attrs,
            value: restore_value(value, data, prefix, layouts)?,
        }),
        IndexNode::ExternalLink(link) => Node::Link(link),
    })
}

fn restore_value(
    value: StoredValue,
    data: &[u8],
    path: &str,
    layouts: &mut HashMap<String, ArrayLayout>,
) -> Result<Value> {
    Ok(match value {
        StoredValue::Bool(b) => Value::Bool(b),
        StoredValue::Int(i) => Value::Int(i),
        StoredValue::Float(f) => Value::Float(f),
        StoredValue::Text(s) => Value::Text(s),
        StoredValue::IntList(v) => Value::IntList(v),
        StoredValue::FloatList(v) => Value::FloatList(v),
        StoredValue::Json(j) => Value::Json(j),
        StoredValue::Array(layout) => {
            let array = read_array(&layout, data)?;
            layouts.insert(path.to_string(), layout);
            Value::Array(array)
        }
    })
}

fn read_array(layout: &ArrayLayout, data: &[u8]) -> Result<DataArray> {
    let elem_size = layout.dtype.size();
    let too_large = || StreamError::InvalidShape(format!("{:?} is too large", layout.shape));
    let total = element_count(&layout.shape)?
        .checked_mul(elem_size)
        .ok_or_else(too_large)?;
    let chunk_bytes = element_count(&layout.chunk_shape)?
        .checked_mul(elem_size)
        .ok_or_else(too_large)?;
    let mut raw = Vec::with_capacity(total);
    for chunk in &layout.chunks {
        let range = usize::try_from(chunk.offset).ok().and_then(|start| {
            let end = start.checked_add(usize::try_from(chunk.length).ok()?)?;
            (start >= HEADER_SIZE && end <= data.len()).then_some(start..end)
        });
        let range = range.ok_or_else(|| {
            StreamError::Decompression(format!(
                "chunk at {} (+{}) exceeds file",
                chunk.offset, chunk.length
            ))
        })?;
        let expected = chunk_bytes.min(total.saturating_sub(raw.len()));
        let bytes = decompress(&data[range], layout.compression, elem_size, expected)?;
        raw.extend_from_slice(&bytes);
    }
    DataArray::new(layout.dtype, layout.shape.clone(), raw)
}

/// Read and decode a container file
pub fn load(path: &Path) -> Result<Group> {
    let data = fs::read(path)?;
    decode(path, &data)
}

/// Master file open for in-place commits
///
/// Remembers where every array's chunks live, so a commit only encodes the
/// arrays that changed since the last one.
#[derive(Debug)]
pub struct MasterStore {
    path: PathBuf,
    compression: ContainerCompression,
    level: CompressionLevel,
    index_offset: u64,
    layouts: HashMap<String, ArrayLayout>,
}

impl MasterStore {
    /// Open an existing master and decode its tree
    pub fn open(
        path: &Path,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<(Self, Group)> {
        let data = fs::read(path)?;
        let decoded = decode_full(path, &data)?;
        let store = Self {
            path: path.to_path_buf(),
            compression,
            level,
            index_offset: decoded.index_offset,
            layouts: decoded.layouts,
        };
        Ok((store, decoded.root))
    }

    /// Write `root` as a new master at `path`, replacing any file there
    pub fn create(
        path: &Path,
        root: &Group,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<Self> {
        super::write_new(path, root, compression, level, true)?;
        let (store, _) = Self::open(path, compression, level)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the file in line with `root` after `changes`
    ///
    /// New chunks and the new index are written where the old index began,
    /// the file is cut to length, and the header is rewritten last.
    pub fn apply(&mut self, root: &Group, changes: &[Change]) -> Result<()> {
        let mut encoder = Encoder::new(self.index_offset, self.compression, self.level);
        encoder.reused = self
            .layouts
            .iter()
            .filter(|(path, _)| !changes.iter().any(|c| c.covers(path)))
            .map(|(path, layout)| (path.clone(), layout.clone()))
            .collect();
        let index = encoder.group(root, "")?;
        let reused = encoder.layouts.len();
        let layouts = std::mem::take(&mut encoder.layouts);
        let (tail, index_offset, index_len) = encoder.finish(index)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(self.index_offset))?;
        file.write_all(&tail)?;
        file.set_len(self.index_offset + tail.len() as u64)?;
        file.sync_data()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header(index_offset, index_len))?;
        file.sync_all()?;

        debug!(
            path = %self.path.display(),
            changes = changes.len(),
            arrays = reused,
            appended = tail.len(),
            "Master committed"
        );
        self.index_offset = index_offset;
        self.layouts = layouts;
        Ok(())
    }
}

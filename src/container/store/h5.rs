//! HDF5 container files
//!
//! Groups, datasets and attributes map one to one onto HDF5 objects and
//! links onto real HDF5 external links, so masters open in any HDF5 reader.
//! Arrays with three or more dimensions are chunked one image per chunk.
//!
//! Text is stored as variable-length UTF-8. JSON values are stored as text
//! with a `value_encoding = "json"` attribute. One-dimensional `int64` and
//! `float64` datasets read back as integer and float lists.

use super::{chunk_shape, Change};
use crate::array::{DataArray, Element, ElementType};
use crate::compression::{CompressionLevel, ContainerCompression};
use crate::container::node::{split_path, AttrValue, Attributes, Dataset, ExternalLink, Group, Node, Value};
use crate::error::{Result, StreamError};
use hdf5::filters::Filter;
use hdf5::types::{FloatSize, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{H5Type, LinkInfo, LinkType, Location, LocationType};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// File extension of HDF5 containers
pub const EXTENSION: &str = "h5";

const JSON_MARKER: &str = "value_encoding";

fn filter_pipeline(compression: ContainerCompression, level: CompressionLevel) -> Vec<Filter> {
    let clevel = u8::try_from(level.level().min(9)).unwrap_or(9);
    match compression {
        ContainerCompression::None => Vec::new(),
        ContainerCompression::Deflate | ContainerCompression::Gzip => vec![Filter::Deflate(clevel)],
        #[cfg(feature = "hdf5_blosc")]
        ContainerCompression::Lz4 => vec![Filter::Blosc(
            hdf5::filters::Blosc::LZ4,
            clevel,
            hdf5::filters::BloscShuffle::Byte,
        )],
        #[cfg(feature = "hdf5_blosc")]
        ContainerCompression::Bslz4 => vec![Filter::Blosc(
            hdf5::filters::Blosc::LZ4,
            clevel,
            hdf5::filters::BloscShuffle::Bit,
        )],
        #[cfg(not(feature = "hdf5_blosc"))]
        ContainerCompression::Lz4 | ContainerCompression::Bslz4 => {
            vec![Filter::Shuffle, Filter::Deflate(clevel)]
        }
    }
}

fn unicode(text: &str) -> Result<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|e| StreamError::Hdf5(hdf5::Error::from(format!("{:?}: {}", text, e))))
}

/// Replace every attribute of `loc` with `attrs`
fn write_attrs(loc: &Location, attrs: &Attributes) -> Result<()> {
    for name in loc.attr_names()? {
        loc.delete_attr(&name)?;
    }
    add_attrs(loc, attrs)
}

fn add_attrs(loc: &Location, attrs: &Attributes) -> Result<()> {
    for (name, value) in attrs {
        match value {
            AttrValue::Int(i) => loc.new_attr::<i64>().create(name.as_str())?.write_scalar(i)?,
            AttrValue::Float(f) => loc.new_attr::<f64>().create(name.as_str())?.write_scalar(f)?,
            AttrValue::Text(s) => loc
                .new_attr::<VarLenUnicode>()
                .create(name.as_str())?
                .write_scalar(&unicode(s)?)?,
        }
    }
    Ok(())
}

fn write_scalar<T: H5Type>(group: &hdf5::Group, name: &str, value: &T) -> Result<hdf5::Dataset> {
    let ds = group.new_dataset::<T>().create(name)?;
    ds.write_scalar(value)?;
    Ok(ds)
}

fn write_list<T: H5Type>(group: &hdf5::Group, name: &str, values: &[T]) -> Result<hdf5::Dataset> {
    let ds = group.new_dataset::<T>().shape(vec![values.len()]).create(name)?;
    ds.write_raw(values)?;
    Ok(ds)
}

fn write_array<T: Element + H5Type>(
    group: &hdf5::Group,
    name: &str,
    array: &DataArray,
    filters: &[Filter],
) -> Result<hdf5::Dataset> {
    let values = array.to_vec::<T>()?;
    let shape = array.shape().to_vec();
    let mut builder = group.new_dataset::<T>().shape(shape.clone());
    if !filters.is_empty() && shape.iter().all(|&dim| dim > 0) {
        builder = builder.chunk(chunk_shape(&shape)).set_filters(filters);
    }
    let ds = builder.create(name)?;
    ds.write_raw(values.as_slice())?;
    Ok(ds)
}

fn write_value(
    group: &hdf5::Group,
    name: &str,
    value: &Value,
    filters: &[Filter],
) -> Result<hdf5::Dataset> {
    match value {
        Value::Bool(b) => write_scalar(group, name, b),
        Value::Int(i) => write_scalar(group, name, i),
        Value::Float(f) => write_scalar(group, name, f),
        Value::Text(s) => write_scalar(group, name, &unicode(s)?),
        Value::IntList(v) => write_list(group, name, v),
        Value::FloatList(v) => write_list(group, name, v),
        Value::Json(j) => {
            let ds = write_scalar(group, name, &unicode(&j.to_string())?)?;
            ds.new_attr::<VarLenUnicode>()
                .create(JSON_MARKER)?
                .write_scalar(&unicode("json")?)?;
            Ok(ds)
        }
        Value::Array(a) => match a.dtype() {
            ElementType::Uint8 => write_array::<u8>(group, name, a, filters),
            ElementType::Uint16 => write_array::<u16>(group, name, a, filters),
            ElementType::Uint32 => write_array::<u32>(group, name, a, filters),
            ElementType::Uint64 => write_array::<u64>(group, name, a, filters),
            ElementType::Int8 => write_array::<i8>(group, name, a, filters),
            ElementType::Int16 => write_array::<i16>(group, name, a, filters),
            ElementType::Int32 => write_array::<i32>(group, name, a, filters),
            ElementType::Int64 => write_array::<i64>(group, name, a, filters),
            ElementType::Float32 => write_array::<f32>(group, name, a, filters),
            ElementType::Float64 => write_array::<f64>(group, name, a, filters),
        },
    }
}

fn write_node(group: &hdf5::Group, name: &str, node: &Node, filters: &[Filter]) -> Result<()> {
    match node {
        Node::Group(g) => {
            let child = group.create_group(name)?;
            write_attrs(&child, &g.attrs)?;
            for (child_name, child_node) in &g.children {
                write_node(&child, child_name, child_node, filters)?;
            }
        }
        Node::Dataset(d) => {
            let ds = write_value(group, name, &d.value, filters)?;
            add_attrs(&ds, &d.attrs)?;
        }
        Node::Link(link) => group.link_external(&link.file, &link.path, name)?,
    }
    Ok(())
}

/// Write `root` as a complete HDF5 file at `path`, truncating any file there
pub fn write_tree(
    path: &Path,
    root: &Group,
    compression: ContainerCompression,
    level: CompressionLevel,
) -> Result<()> {
    let filters = filter_pipeline(compression, level);
    let file = hdf5::File::create(path)?;
    write_attrs(&file, &root.attrs)?;
    for (name, node) in &root.children {
        write_node(&file, name, node, &filters)?;
    }
    file.close()?;
    trace!(path = %path.display(), nodes = root.node_count(), "Container encoded");
    Ok(())
}

fn read_attrs(loc: &Location) -> Result<Attributes> {
    let mut attrs = Attributes::new();
    for name in loc.attr_names()? {
        let attr = loc.attr(&name)?;
        let value = match attr.dtype()?.to_descriptor()? {
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
                AttrValue::Int(attr.read_scalar::<i64>()?)
            }
            TypeDescriptor::Float(_) => AttrValue::Float(attr.read_scalar::<f64>()?),
            TypeDescriptor::VarLenUnicode => {
                AttrValue::Text(attr.read_scalar::<VarLenUnicode>()?.as_str().to_string())
            }
            TypeDescriptor::VarLenAscii => {
                AttrValue::Text(attr.read_scalar::<VarLenAscii>()?.as_str().to_string())
            }
            other => {
                debug!(attr = %name, dtype = ?other, "Skipping attribute of unsupported type");
                continue;
            }
        };
        attrs.insert(name, value);
    }
    Ok(attrs)
}

fn read_typed<T: Element + H5Type>(ds: &hdf5::Dataset) -> Result<DataArray> {
    DataArray::from_vec(ds.shape(), ds.read_raw::<T>()?)
}

fn unsupported(ds: &hdf5::Dataset, dtype: &TypeDescriptor) -> StreamError {
    StreamError::InvalidContainer {
        path: PathBuf::from(ds.filename()),
        reason: format!("{}: unsupported dataset type {:?}", ds.name(), dtype),
    }
}

fn read_value(ds: &hdf5::Dataset) -> Result<Value> {
    let dtype = ds.dtype()?.to_descriptor()?;
    if ds.is_scalar() {
        return Ok(match dtype {
            TypeDescriptor::Boolean => Value::Bool(ds.read_scalar::<bool>()?),
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
                Value::Int(ds.read_scalar::<i64>()?)
            }
            TypeDescriptor::Float(_) => Value::Float(ds.read_scalar::<f64>()?),
            TypeDescriptor::VarLenUnicode => {
                Value::Text(ds.read_scalar::<VarLenUnicode>()?.as_str().to_string())
            }
            TypeDescriptor::VarLenAscii => {
                Value::Text(ds.read_scalar::<VarLenAscii>()?.as_str().to_string())
            }
            other => return Err(unsupported(ds, &other)),
        });
    }

    let one_dim = ds.ndim() == 1;
    Ok(match dtype {
        TypeDescriptor::Integer(IntSize::U8) if one_dim => Value::IntList(ds.read_raw::<i64>()?),
        TypeDescriptor::Float(FloatSize::U8) if one_dim => Value::FloatList(ds.read_raw::<f64>()?),
        TypeDescriptor::Unsigned(IntSize::U1) => Value::Array(read_typed::<u8>(ds)?),
        TypeDescriptor::Unsigned(IntSize::U2) => Value::Array(read_typed::<u16>(ds)?),
        TypeDescriptor::Unsigned(IntSize::U4) => Value::Array(read_typed::<u32>(ds)?),
        TypeDescriptor::Unsigned(IntSize::U8) => Value::Array(read_typed::<u64>(ds)?),
        TypeDescriptor::Integer(IntSize::U1) => Value::Array(read_typed::<i8>(ds)?),
        TypeDescriptor::Integer(IntSize::U2) => Value::Array(read_typed::<i16>(ds)?),
        TypeDescriptor::Integer(IntSize::U4) => Value::Array(read_typed::<i32>(ds)?),
        TypeDescriptor::Integer(IntSize::U8) => Value::Array(read_typed::<i64>(ds)?),
        TypeDescriptor::Float(FloatSize::U4) => Value::Array(read_typed::<f32>(ds)?),
        TypeDescriptor::Float(FloatSize::U8) => Value::Array(read_typed::<f64>(ds)?),
        other => return Err(unsupported(ds, &other)),
    })
}

fn read_dataset(ds: &hdf5::Dataset) -> Result<Dataset> {
    let mut attrs = read_attrs(ds)?;
    let mut value = read_value(ds)?;
    if let Some(AttrValue::Text(encoding)) = attrs.remove(JSON_MARKER) {
        if encoding == "json" {
            if let Value::Text(text) = &value {
                let json = serde_json::from_str(text).map_err(std::io::Error::from)?;
                value = Value::Json(json);
            }
        }
    }
    Ok(Dataset { attrs, value })
}

/// Where an external link points, read by opening the dataset through it
fn read_link(group: &hdf5::Group, name: &str) -> Result<ExternalLink> {
    let target = group.dataset(name)?;
    let file = Path::new(&target.filename())
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ExternalLink {
        file,
        path: target.name(),
    })
}

fn read_group(group: &hdf5::Group) -> Result<Group> {
    let members = group.iter_visit_default(
        Vec::new(),
        |_: &hdf5::Group, name: &str, info: LinkInfo, acc: &mut Vec<(String, LinkType)>| {
            acc.push((name.to_string(), info.link_type));
            true
        },
    )?;

    let mut children = BTreeMap::new();
    for (name, link_type) in members {
        let node = match link_type {
            LinkType::External => Node::Link(read_link(group, &name)?),
            LinkType::Soft => continue,
            LinkType::Hard => match group.loc_type_by_name(&name)? {
                LocationType::Group => Node::Group(read_group(&group.group(&name)?)?),
                LocationType::Dataset => Node::Dataset(read_dataset(&group.dataset(&name)?)?),
                _ => continue,
            },
        };
        children.insert(name, node);
    }
    Ok(Group {
        attrs: read_attrs(group)?,
        children,
    })
}

/// Read a whole HDF5 container into a tree
///
/// External links are followed once to learn their target, so the linked
/// files must be readable.
pub fn load(path: &Path) -> Result<Group> {
    let file = hdf5::File::open(path)?;
    read_group(&file)
}

/// Parent group of `path`, created along with its ancestors as needed
///
/// Newly created groups take their attributes from `root`.
fn ensure_parent(file: &hdf5::File, root: &Group, path: &str) -> Result<hdf5::Group> {
    let components = split_path(path);
    let mut group = file.group("/")?;
    let mut prefix = String::new();
    for name in components.iter().take(components.len().saturating_sub(1)) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(name);
        group = if group.link_exists(name) {
            group.group(name)?
        } else {
            let created = group.create_group(name)?;
            if let Some(tree) = root.group(&prefix) {
                write_attrs(&created, &tree.attrs)?;
            }
            created
        };
    }
    Ok(group)
}

/// Master file open for in-place commits
///
/// Each commit touches only the objects its changes name, so chunks written
/// by earlier commits stay where they are.
#[derive(Debug)]
pub struct MasterStore {
    path: PathBuf,
    compression: ContainerCompression,
    level: CompressionLevel,
}

impl MasterStore {
    /// Open an existing master and read its tree
    pub fn open(
        path: &Path,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<(Self, Group)> {
        let root = load(path)?;
        let store = Self {
            path: path.to_path_buf(),
            compression,
            level,
        };
        Ok((store, root))
    }

    /// Write `root` as a new master at `path`, replacing any file there
    pub fn create(
        path: &Path,
        root: &Group,
        compression: ContainerCompression,
        level: CompressionLevel,
    ) -> Result<Self> {
        super::write_new(path, root, compression, level, true)?;
        Ok(Self {
            path: path.to_path_buf(),
            compression,
            level,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the file in line with `root` after `changes`
    pub fn apply(&mut self, root: &Group, changes: &[Change]) -> Result<()> {
        let filters = filter_pipeline(self.compression, self.level);
        let file = hdf5::File::open_rw(&self.path)?;
        for change in changes {
            let path = change.path();
            match change {
                Change::Remove(_) => {
                    if file.link_exists(path) {
                        file.unlink(path)?;
                    }
                }
                Change::Write(_) => {
                    // removed again later in the same batch
                    let Some(node) = root.get(path) else { continue };
                    let parent = ensure_parent(&file, root, path)?;
                    let name = split_path(path).last().copied().unwrap_or_default();
                    match node {
                        Node::Group(g) if parent.link_exists(name) => {
                            write_attrs(&parent.group(name)?, &g.attrs)?;
                        }
                        _ => {
                            if parent.link_exists(name) {
                                parent.unlink(name)?;
                            }
                            write_node(&parent, name, node, &filters)?;
                        }
                    }
                }
            }
        }
        file.flush()?;
        debug!(path = %self.path.display(), changes = changes.len(), "Master committed");
        Ok(())
    }
}

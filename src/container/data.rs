//! Write-once data containers

use super::mapping::DATA_PATH;
use super::node::{Dataset, Group, Node, Value};
use super::store;
use crate::array::DataArray;
use crate::compression::{CompressionLevel, ContainerCompression};
use crate::error::Result;
use std::path::Path;

/// Ordinal range attribute names on the image dataset
pub const IMAGE_NR_LOW: &str = "image_nr_low";
pub const IMAGE_NR_HIGH: &str = "image_nr_high";

/// Write a stack of images as a new data container
///
/// `first_image` and `last_image` are the 1-based ordinals of the first and
/// last image within the series. An existing file at `path` is never
/// overwritten, even by a writer racing for the same name.
pub fn write_data_container(
    path: &Path,
    images: DataArray,
    first_image: u64,
    last_image: u64,
    compression: ContainerCompression,
    level: CompressionLevel,
) -> Result<()> {
    let mut root = Group::new();
    root.ensure_group("entry")?.set_attr("NX_class", "NXentry");
    root.ensure_group("entry/data")?.set_attr("NX_class", "NXdata");

    let mut dataset = Dataset::new(Value::Array(images));
    dataset
        .attrs
        .insert(IMAGE_NR_LOW.to_string(), (first_image as i64).into());
    dataset
        .attrs
        .insert(IMAGE_NR_HIGH.to_string(), (last_image as i64).into());
    root.insert(DATA_PATH, Node::Dataset(dataset))?;

    store::write_new(path, &root, compression, level, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::node::AttrValue;
    use crate::container::{ContainerFile, EXTENSION};
    use crate::error::StreamError;

    #[test]
    fn test_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("s_1_data_000001.{}", EXTENSION));
        let images = DataArray::from_vec(vec![2, 3, 3], vec![9u16; 18]).unwrap();

        write_data_container(
            &path,
            images.clone(),
            101,
            102,
            ContainerCompression::Bslz4,
            CompressionLevel::Default,
        )
        .unwrap();

        let file = ContainerFile::open(&path).unwrap();
        assert_eq!(file.read_value(DATA_PATH).unwrap().as_array(), Some(&images));
        let attrs = file.attrs(DATA_PATH).unwrap();
        assert_eq!(attrs.get(IMAGE_NR_LOW), Some(&AttrValue::Int(101)));
        assert_eq!(attrs.get(IMAGE_NR_HIGH), Some(&AttrValue::Int(102)));

        let err = write_data_container(
            &path,
            images,
            1,
            2,
            ContainerCompression::None,
            CompressionLevel::Default,
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::EntryExists(_)));
    }
}

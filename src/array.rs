//! Dense numeric arrays decoded from the stream
//!
//! A [`DataArray`] owns its samples as little-endian bytes together with the
//! element type and a row-major shape. Typed access goes through the
//! [`Element`] trait.

use crate::error::{Result, StreamError};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Fixed-width numeric element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ElementType {
    /// Parse a type tag as sent by the detector
    ///
    /// Accepts the long names (`uint16`, `float32`) and the numpy-style
    /// little-endian short codes (`<u2`, `u2`, `<f4`).
    ///
    /// # Examples
    ///
    /// ```
    /// use eiger_stream_rust::array::ElementType;
    ///
    /// assert_eq!(ElementType::parse("uint16").unwrap(), ElementType::Uint16);
    /// assert_eq!(ElementType::parse("<u4").unwrap(), ElementType::Uint32);
    /// assert!(ElementType::parse(">u2").is_err());
    /// ```
    pub fn parse(tag: &str) -> Result<Self> {
        let code = tag.strip_prefix('<').unwrap_or(tag);
        let ty = match code {
            "uint8" | "u1" | "|u1" => Self::Uint8,
            "uint16" | "u2" => Self::Uint16,
            "uint32" | "u4" => Self::Uint32,
            "uint64" | "u8" => Self::Uint64,
            "int8" | "i1" | "|i1" => Self::Int8,
            "int16" | "i2" => Self::Int16,
            "int32" | "i4" => Self::Int32,
            "int64" | "i8" => Self::Int64,
            "float32" | "f4" => Self::Float32,
            "float64" | "f8" => Self::Float64,
            _ => return Err(StreamError::UnsupportedElementType(tag.to_string())),
        };
        Ok(ty)
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Bit depth of one element
    pub fn bits(&self) -> usize {
        self.size() * 8
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar type that can be stored in a [`DataArray`]
pub trait Element: Copy + PartialEq + std::fmt::Debug + 'static {
    /// Matching element type tag
    const TYPE: ElementType;

    /// Read one value from exactly `TYPE.size()` little-endian bytes
    fn read_le(bytes: &[u8]) -> Self;

    /// Append the little-endian representation to `out`
    fn write_le(self, out: &mut BytesMut);

    /// Lossy conversion used for derived statistics
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($ty:ty, $tag:ident, $n:expr) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$tag;

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(buf)
            }

            fn write_le(self, out: &mut BytesMut) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_element!(u8, Uint8, 1);
impl_element!(u16, Uint16, 2);
impl_element!(u32, Uint32, 4);
impl_element!(u64, Uint64, 8);
impl_element!(i8, Int8, 1);
impl_element!(i16, Int16, 2);
impl_element!(i32, Int32, 4);
impl_element!(i64, Int64, 8);
impl_element!(f32, Float32, 4);
impl_element!(f64, Float64, 8);

/// Dense row-major array with little-endian sample bytes
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    dtype: ElementType,
    shape: Vec<usize>,
    data: Bytes,
}

impl DataArray {
    /// Create an array from raw little-endian bytes
    ///
    /// Fails with [`StreamError::InvalidSize`] if the byte count does not match
    /// `product(shape) * dtype.size()`, and with [`StreamError::InvalidShape`]
    /// if that product does not fit in `usize`.
    pub fn new(dtype: ElementType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = element_count(&shape)?
            .checked_mul(dtype.size())
            .ok_or_else(|| overflow(&shape))?;
        if data.len() != expected {
            return Err(StreamError::InvalidSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Create an array from typed values
    ///
    /// # Examples
    ///
    /// ```
    /// use eiger_stream_rust::array::DataArray;
    ///
    /// let image = DataArray::from_vec(vec![2, 3], vec![0u16, 1, 2, 3, 4, 5]).unwrap();
    /// assert_eq!(image.shape(), &[2, 3]);
    /// assert_eq!(image.to_vec::<u16>().unwrap()[4], 4);
    /// ```
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(values.len() * T::TYPE.size());
        for v in values {
            v.write_le(&mut buf);
        }
        Self::new(T::TYPE, shape, buf.freeze())
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Row-major shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    /// True if the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian sample bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the sample bytes
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Copy the samples out as typed values
    ///
    /// `T` must match the array's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::TYPE != self.dtype {
            return Err(StreamError::UnsupportedElementType(format!(
                "array holds {}, requested {}",
                self.dtype,
                T::TYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size())
            .map(T::read_le)
            .collect())
    }

    /// Samples converted to `f64` regardless of element type
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.dtype.size();
        let chunks = self.data.chunks_exact(size);
        match self.dtype {
            ElementType::Uint8 => chunks.map(|c| u8::read_le(c).to_f64()).collect(),
            ElementType::Uint16 => chunks.map(|c| u16::read_le(c).to_f64()).collect(),
            ElementType::Uint32 => chunks.map(|c| u32::read_le(c).to_f64()).collect(),
            ElementType::Uint64 => chunks.map(|c| u64::read_le(c).to_f64()).collect(),
            ElementType::Int8 => chunks.map(|c| i8::read_le(c).to_f64()).collect(),
            ElementType::Int16 => chunks.map(|c| i16::read_le(c).to_f64()).collect(),
            ElementType::Int32 => chunks.map(|c| i32::read_le(c).to_f64()).collect(),
            ElementType::Int64 => chunks.map(|c| i64::read_le(c).to_f64()).collect(),
            ElementType::Float32 => chunks.map(|c| f32::read_le(c).to_f64()).collect(),
            ElementType::Float64 => chunks.map(|c| f64::read_le(c)).collect(),
        }
    }

    /// Reinterpret the same bytes with a different shape
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        Self::new(self.dtype, shape, self.data)
    }

    /// Stack images along a new leading axis
    ///
    /// 2-D inputs are promoted to `[1, h, w]`; 3-D inputs are concatenated along
    /// axis 0. All inputs must share element type and image shape.
    pub fn stack(arrays: &[DataArray]) -> Result<Self> {
        let first = arrays
            .first()
            .ok_or_else(|| StreamError::InvalidShape("cannot stack zero arrays".to_string()))?;
        let first_shape = image_shape(first)?;
        let mut depth = 0;
        let mut buf = BytesMut::with_capacity(arrays.iter().map(|a| a.data.len()).sum());
        for array in arrays {
            if array.dtype != first.dtype {
                return Err(StreamError::UnsupportedElementType(format!(
                    "cannot stack {} with {}",
                    array.dtype, first.dtype
                )));
            }
            if image_shape(array)? != first_shape {
                return Err(StreamError::InvalidShape(format!(
                    "cannot stack {:?} with {:?}",
                    array.shape, first.shape
                )));
            }
            depth += if array.ndim() == 3 { array.shape[0] } else { 1 };
            buf.extend_from_slice(&array.data);
        }
        Self::new(
            first.dtype,
            vec![depth, first_shape[0], first_shape[1]],
            buf.freeze(),
        )
    }
}

fn image_shape(array: &DataArray) -> Result<[usize; 2]> {
    match array.shape() {
        [h, w] | [_, h, w] => Ok([*h, *w]),
        other => Err(StreamError::InvalidShape(format!(
            "expected a 2-D or 3-D image, got {:?}",
            other
        ))),
    }
}

/// Product of the dimensions
///
/// Shapes come off the wire, so an overflowing product is an
/// [`StreamError::InvalidShape`] rather than a panic.
///
/// # Examples
///
/// ```
/// use eiger_stream_rust::array::element_count;
///
/// assert_eq!(element_count(&[4, 3]).unwrap(), 12);
/// assert!(element_count(&[1 << 32, 1 << 32, 2]).is_err());
/// ```
pub fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| overflow(shape))
}

fn overflow(shape: &[usize]) -> StreamError {
    StreamError::InvalidShape(format!("element count of {:?} overflows", shape))
}

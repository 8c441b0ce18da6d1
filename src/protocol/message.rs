//! Typed stream messages
//!
//! A message arrives as an ordered list of parts. Part 0 is the
//! [`Envelope`]; the layout of the remaining parts depends on its kind:
//!
//! ```text
//! header  [envelope, config?, (table info, table data)*, appendix?]
//! image   [envelope, image info, blob, timing, appendix?]
//! end     [envelope]
//! ```

use super::envelope::{Envelope, HeaderDetail, MessageKind};
use crate::array::{DataArray, ElementType};
use crate::codec::decode_tagged;
use crate::error::{Result, StreamError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tracing::warn;

/// Kind of correction table sent with a full header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrectionKind {
    Flatfield,
    PixelMask,
    CountrateTable,
}

impl CorrectionKind {
    /// Recognize the `htype` of a table info part
    pub fn from_htype(htype: &str) -> Option<Self> {
        if htype.starts_with("dflatfield") {
            Some(Self::Flatfield)
        } else if htype.starts_with("dpixelmask") {
            Some(Self::PixelMask)
        } else if htype.starts_with("dcountrate_table") {
            Some(Self::CountrateTable)
        } else {
            None
        }
    }

    /// Wire `htype` for this table
    pub fn htype(&self) -> &'static str {
        match self {
            Self::Flatfield => "dflatfield-1.0",
            Self::PixelMask => "dpixelmask-1.0",
            Self::CountrateTable => "dcountrate_table-1.0",
        }
    }

    /// Master parameter key the table is stored under
    pub fn parameter_key(&self) -> &'static str {
        match self {
            Self::Flatfield => "flatfield",
            Self::PixelMask => "pixel_mask",
            Self::CountrateTable => "countrate_correction_table",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TableInfo {
    htype: String,
    shape: Vec<usize>,
    #[serde(rename = "type")]
    dtype: String,
}

/// Flatfield, pixel mask or count-rate lookup table
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionTable {
    pub kind: CorrectionKind,
    /// Row-major array; the declared shape is reversed
    pub array: DataArray,
}

impl CorrectionTable {
    /// Parse an info part and its raw little-endian data part
    ///
    /// `index` is the position of the info part, for error messages.
    pub fn parse(info: &[u8], data: &Bytes, index: usize) -> Result<Self> {
        let info: TableInfo = serde_json::from_slice(info).map_err(|e| StreamError::json(index, e))?;
        let kind = CorrectionKind::from_htype(&info.htype)
            .ok_or_else(|| StreamError::UnknownMessageType(info.htype.clone()))?;
        let dtype = ElementType::parse(&info.dtype)?;
        let shape = info.shape.iter().rev().copied().collect();
        let array = DataArray::new(dtype, shape, data.clone())?;
        Ok(Self { kind, array })
    }

    /// Wire parts for this table: info JSON and raw data
    pub fn to_parts(&self) -> Result<[Bytes; 2]> {
        let info = TableInfo {
            htype: self.kind.htype().to_string(),
            shape: self.array.shape().iter().rev().copied().collect(),
            dtype: self.array.dtype().name().to_string(),
        };
        let info = serde_json::to_vec(&info).map_err(|e| StreamError::json(0, e))?;
        Ok([Bytes::from(info), self.array.bytes()])
    }
}

/// Start of a series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesHeader {
    pub series_id: u64,
    pub detail: HeaderDetail,
    /// Detector configuration, absent when `detail` is `none`
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
    pub corrections: Vec<CorrectionTable>,
    pub appendix: Option<Bytes>,
}

impl SeriesHeader {
    fn parse(envelope: &Envelope, parts: &[Bytes]) -> Result<Self> {
        let series_id = envelope.require_series()?;
        let detail = envelope.header_detail.ok_or(StreamError::MissingField {
            part: 0,
            field: "header_detail",
        })?;
        let bad_count = || StreamError::InvalidPartCount {
            message: "header",
            actual: parts.len(),
        };

        let mut rest = &parts[1..];
        let mut index = 1;
        let config = if detail == HeaderDetail::None {
            None
        } else {
            let (first, tail) = rest.split_first().ok_or_else(bad_count)?;
            let config = serde_json::from_slice(first).map_err(|e| StreamError::json(index, e))?;
            rest = tail;
            index += 1;
            Some(config)
        };

        let mut corrections = Vec::new();
        if detail == HeaderDetail::All {
            while rest.len() >= 2 {
                match CorrectionTable::parse(&rest[0], &rest[1], index) {
                    Ok(table) => corrections.push(table),
                    Err(e) => warn!(
                        series = series_id,
                        part = index,
                        error = %e,
                        "Malformed correction table skipped"
                    ),
                }
                rest = &rest[2..];
                index += 2;
            }
        }

        let appendix = match rest {
            [] => None,
            [appendix] => Some(appendix.clone()),
            _ => return Err(bad_count()),
        };

        Ok(Self {
            series_id,
            detail,
            config,
            corrections,
            appendix,
        })
    }

    /// Appendix as text, for logging
    pub fn appendix_text(&self) -> Option<Cow<'_, str>> {
        self.appendix.as_deref().map(String::from_utf8_lossy)
    }

    /// Wire parts for this header
    pub fn to_parts(&self) -> Result<Vec<Bytes>> {
        let mut parts = vec![Bytes::from(
            Envelope::header(self.series_id, self.detail).to_bytes()?,
        )];
        if let Some(config) = &self.config {
            let json = serde_json::to_vec(config).map_err(|e| StreamError::json(1, e))?;
            parts.push(Bytes::from(json));
        }
        for table in &self.corrections {
            parts.extend(table.to_parts()?);
        }
        parts.extend(self.appendix.clone());
        Ok(parts)
    }
}

/// Image info part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(default = "image_info_htype")]
    pub htype: String,
    /// Declared shape, fastest-varying dimension first
    pub shape: Vec<usize>,
    #[serde(rename = "type")]
    pub dtype: String,
    pub encoding: String,
    /// Compressed blob size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

fn image_info_htype() -> String {
    "dimage_d-1.0".to_string()
}

/// Timing part of an image, times in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameTiming {
    #[serde(default)]
    pub start_time: u64,
    #[serde(default)]
    pub stop_time: u64,
    #[serde(default)]
    pub real_time: u64,
}

impl FrameTiming {
    /// Exposure time measured by the detector
    pub fn real_time(&self) -> Duration {
        Duration::from_nanos(self.real_time)
    }
}

/// One compressed image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub series_id: u64,
    pub frame_id: u64,
    pub hash: Option<String>,
    pub info: ImageInfo,
    pub payload: Bytes,
    /// Absent if the timing part could not be parsed
    pub timing: Option<FrameTiming>,
    pub appendix: Option<Bytes>,
}

impl ImageFrame {
    fn parse(envelope: &Envelope, parts: &[Bytes]) -> Result<Self> {
        if !(4..=5).contains(&parts.len()) {
            return Err(StreamError::InvalidPartCount {
                message: "image",
                actual: parts.len(),
            });
        }
        let series_id = envelope.require_series()?;
        let frame_id = envelope.frame.ok_or(StreamError::MissingField {
            part: 0,
            field: "frame",
        })?;
        let info: ImageInfo =
            serde_json::from_slice(&parts[1]).map_err(|e| StreamError::json(1, e))?;
        let timing = match serde_json::from_slice::<FrameTiming>(&parts[3]) {
            Ok(timing) => Some(timing),
            Err(e) => {
                warn!(series = series_id, frame = frame_id, error = %e, "Unreadable timing part");
                None
            }
        };

        Ok(Self {
            series_id,
            frame_id,
            hash: envelope.hash.clone(),
            info,
            payload: parts[2].clone(),
            timing,
            appendix: parts.get(4).cloned(),
        })
    }

    /// Decompress the payload into a row-major array
    pub fn decode(&self) -> Result<DataArray> {
        if let Some(size) = self.info.size {
            if size != self.payload.len() {
                return Err(StreamError::InvalidSize {
                    expected: size,
                    actual: self.payload.len(),
                });
            }
        }
        decode_tagged(
            &self.info.dtype,
            &self.info.shape,
            &self.info.encoding,
            &self.payload,
        )
    }

    /// Appendix as text, for logging
    pub fn appendix_text(&self) -> Option<Cow<'_, str>> {
        self.appendix.as_deref().map(String::from_utf8_lossy)
    }

    /// Wire parts for this image
    pub fn to_parts(&self) -> Result<Vec<Bytes>> {
        let mut envelope = Envelope::image(self.series_id, self.frame_id);
        envelope.hash = self.hash.clone();
        let info = serde_json::to_vec(&self.info).map_err(|e| StreamError::json(1, e))?;
        let timing = serde_json::to_vec(&self.timing.unwrap_or_default())
            .map_err(|e| StreamError::json(3, e))?;
        let mut parts = vec![
            Bytes::from(envelope.to_bytes()?),
            Bytes::from(info),
            self.payload.clone(),
            Bytes::from(timing),
        ];
        parts.extend(self.appendix.clone());
        Ok(parts)
    }
}

/// End of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesEnd {
    pub series_id: Option<u64>,
}

impl SeriesEnd {
    fn parse(envelope: &Envelope, parts: &[Bytes]) -> Result<Self> {
        if parts.len() != 1 {
            return Err(StreamError::InvalidPartCount {
                message: "end",
                actual: parts.len(),
            });
        }
        Ok(Self {
            series_id: envelope.series,
        })
    }
}

/// A classified, parsed stream message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Header(SeriesHeader),
    Image(ImageFrame),
    End(SeriesEnd),
}

impl StreamMessage {
    /// Parse a multipart message
    ///
    /// Any failure rejects the whole message.
    pub fn from_parts(parts: &[Bytes]) -> Result<Self> {
        let first = parts.first().ok_or(StreamError::InvalidPartCount {
            message: "empty",
            actual: 0,
        })?;
        let envelope = Envelope::parse(first)?;
        Ok(match envelope.kind()? {
            MessageKind::Header => Self::Header(SeriesHeader::parse(&envelope, parts)?),
            MessageKind::Image => Self::Image(ImageFrame::parse(&envelope, parts)?),
            MessageKind::End => Self::End(SeriesEnd::parse(&envelope, parts)?),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Header(_) => MessageKind::Header,
            Self::Image(_) => MessageKind::Image,
            Self::End(_) => MessageKind::End,
        }
    }
}

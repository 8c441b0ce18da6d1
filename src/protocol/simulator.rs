//! Message builder for a simulated detector
//!
//! Produces the same multipart messages a detector would send, for tests,
//! benchmarks and replaying recorded images.
//!
//! # Examples
//!
//! ```
//! use eiger_stream_rust::array::DataArray;
//! use eiger_stream_rust::codec::Encoding;
//! use eiger_stream_rust::protocol::{DetectorSimulator, HeaderDetail, StreamMessage};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut detector = DetectorSimulator::new(1, Encoding::BitshuffleLz4);
//! let header = detector.header(HeaderDetail::Basic, json!({"nimages": 1}), Vec::new())?;
//! let image = detector.image(&DataArray::from_vec(vec![2, 2], vec![0u16; 4])?)?;
//! let end = detector.end()?;
//!
//! assert!(matches!(StreamMessage::from_parts(&image)?, StreamMessage::Image(_)));
//! # Ok(())
//! # }
//! ```

use super::envelope::{Envelope, HeaderDetail};
use super::message::{CorrectionTable, FrameTiming, ImageFrame, ImageInfo, SeriesHeader};
use crate::array::DataArray;
use crate::codec::{encode_payload, wire_shape, Encoding};
use crate::error::{Result, StreamError};
use bytes::Bytes;

/// Builds the messages of one series
#[derive(Debug, Clone)]
pub struct DetectorSimulator {
    series_id: u64,
    encoding: Encoding,
    next_frame: u64,
    frame_time_ns: u64,
}

impl DetectorSimulator {
    /// Simulate series `series_id`; frame ids start at 1
    pub fn new(series_id: u64, encoding: Encoding) -> Self {
        Self {
            series_id,
            encoding,
            next_frame: 1,
            frame_time_ns: 10_000_000,
        }
    }

    pub fn series_id(&self) -> u64 {
        self.series_id
    }

    /// Frame id the next call to [`DetectorSimulator::image`] will use
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Skip `count` frame ids, as if the frames were lost in transit
    pub fn skip_frames(&mut self, count: u64) {
        self.next_frame += count;
    }

    /// Header message; `config` must be a JSON object unless `detail` is `none`
    pub fn header(
        &self,
        detail: HeaderDetail,
        config: serde_json::Value,
        corrections: Vec<CorrectionTable>,
    ) -> Result<Vec<Bytes>> {
        let config = match (detail, config) {
            (HeaderDetail::None, _) => None,
            (_, serde_json::Value::Object(map)) => Some(map),
            (_, other) => {
                return Err(StreamError::UnexpectedMessage(format!(
                    "header configuration must be an object, got {}",
                    other
                )))
            }
        };
        let corrections = if detail == HeaderDetail::All {
            corrections
        } else {
            Vec::new()
        };
        SeriesHeader {
            series_id: self.series_id,
            detail,
            config,
            corrections,
            appendix: None,
        }
        .to_parts()
    }

    /// Image message with the next frame id
    pub fn image(&mut self, image: &DataArray) -> Result<Vec<Bytes>> {
        let frame_id = self.next_frame;
        self.next_frame += 1;
        self.image_with_id(frame_id, image)
    }

    /// Image message with an explicit frame id
    pub fn image_with_id(&self, frame_id: u64, image: &DataArray) -> Result<Vec<Bytes>> {
        let blob = encode_payload(image, self.encoding)?;
        let start_time = frame_id.saturating_sub(1) * self.frame_time_ns;
        let frame = ImageFrame {
            series_id: self.series_id,
            frame_id,
            hash: None,
            info: ImageInfo {
                htype: "dimage_d-1.0".to_string(),
                shape: wire_shape(image),
                dtype: image.dtype().name().to_string(),
                encoding: self.encoding.tag(image.dtype()),
                size: Some(blob.len()),
            },
            payload: Bytes::from(blob),
            timing: Some(FrameTiming {
                start_time,
                stop_time: start_time + self.frame_time_ns,
                real_time: self.frame_time_ns,
            }),
            appendix: None,
        };
        frame.to_parts()
    }

    /// End-of-series message
    pub fn end(&self) -> Result<Vec<Bytes>> {
        Ok(vec![Bytes::from(Envelope::end(self.series_id).to_bytes()?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamMessage;
    use serde_json::json;

    #[test]
    fn test_frame_ids_advance() {
        let mut detector = DetectorSimulator::new(2, Encoding::Lz4);
        let image = DataArray::from_vec(vec![3, 3], vec![1u32; 9]).unwrap();
        detector.image(&image).unwrap();
        detector.skip_frames(1);
        let parts = detector.image(&image).unwrap();
        let StreamMessage::Image(frame) = StreamMessage::from_parts(&parts).unwrap() else {
            panic!("not an image");
        };
        assert_eq!(frame.frame_id, 3);
        assert_eq!(frame.info.encoding, "lz4<");
        assert_eq!(frame.decode().unwrap(), image);
    }

    #[test]
    fn test_header_part_counts() {
        let detector = DetectorSimulator::new(1, Encoding::BitshuffleLz4);
        let table = CorrectionTable {
            kind: crate::protocol::CorrectionKind::PixelMask,
            array: DataArray::from_vec(vec![2, 2], vec![0u32; 4]).unwrap(),
        };
        let all = detector
            .header(HeaderDetail::All, json!({}), vec![table.clone()])
            .unwrap();
        assert_eq!(all.len(), 4);
        let basic = detector
            .header(HeaderDetail::Basic, json!({}), vec![table])
            .unwrap();
        assert_eq!(basic.len(), 2);
        assert_eq!(
            detector.header(HeaderDetail::None, json!(null), Vec::new()).unwrap().len(),
            1
        );
        assert!(detector.header(HeaderDetail::Basic, json!([1]), Vec::new()).is_err());
    }
}

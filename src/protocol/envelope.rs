//! Part 0 of every stream message
//!
//! ```json
//! {"htype": "dimage-1.0", "series": 7, "frame": 12, "hash": "a3f1..."}
//! {"htype": "dheader-1.0", "series": 7, "header_detail": "all"}
//! {"htype": "dseries_end-1.0", "series": 7}
//! ```

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// Prefix of series header type tags
pub const HEADER_PREFIX: &str = "dheader-";
/// Prefix of image type tags
pub const IMAGE_PREFIX: &str = "dimage-";
/// Prefix of end-of-series type tags
pub const END_PREFIX: &str = "dseries_end";

/// Amount of detail the detector sends with a series header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderDetail {
    /// Envelope only
    None,
    /// Envelope and configuration
    #[default]
    Basic,
    /// Configuration plus flatfield, pixel mask and count-rate table
    All,
}

/// Message kind, decided by the `htype` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Header,
    Image,
    End,
}

impl MessageKind {
    /// Classify an `htype` tag
    ///
    /// # Examples
    ///
    /// ```
    /// use eiger_stream_rust::protocol::MessageKind;
    ///
    /// assert_eq!(MessageKind::classify("dimage-1.0").unwrap(), MessageKind::Image);
    /// assert_eq!(MessageKind::classify("dseries_end-1.0").unwrap(), MessageKind::End);
    /// assert!(MessageKind::classify("dfoo-1.0").is_err());
    /// ```
    pub fn classify(htype: &str) -> Result<Self> {
        if htype.starts_with(HEADER_PREFIX) {
            Ok(Self::Header)
        } else if htype.starts_with(IMAGE_PREFIX) {
            Ok(Self::Image)
        } else if htype.starts_with(END_PREFIX) {
            Ok(Self::End)
        } else {
            Err(StreamError::UnknownMessageType(htype.to_string()))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Image => "image",
            Self::End => "end",
        }
    }
}

/// Decoded part 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(alias = "message_type")]
    pub htype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, alias = "detail_level", skip_serializing_if = "Option::is_none")]
    pub header_detail: Option<HeaderDetail>,
}

impl Envelope {
    /// Parse part 0
    pub fn parse(part: &[u8]) -> Result<Self> {
        serde_json::from_slice(part).map_err(|e| StreamError::json(0, e))
    }

    pub fn kind(&self) -> Result<MessageKind> {
        MessageKind::classify(&self.htype)
    }

    /// Series id, required for headers and images
    pub fn require_series(&self) -> Result<u64> {
        self.series.ok_or(StreamError::MissingField {
            part: 0,
            field: "series",
        })
    }

    pub fn header(series: u64, detail: HeaderDetail) -> Self {
        Self {
            htype: "dheader-1.0".to_string(),
            series: Some(series),
            frame: None,
            hash: None,
            header_detail: Some(detail),
        }
    }

    pub fn image(series: u64, frame: u64) -> Self {
        Self {
            htype: "dimage-1.0".to_string(),
            series: Some(series),
            frame: Some(frame),
            hash: None,
            header_detail: None,
        }
    }

    pub fn end(series: u64) -> Self {
        Self {
            htype: "dseries_end-1.0".to_string(),
            series: Some(series),
            frame: None,
            hash: None,
            header_detail: None,
        }
    }

    /// JSON encoding of this envelope
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StreamError::json(0, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_envelope() {
        let env = Envelope::parse(br#"{"htype":"dimage-1.0","series":3,"frame":9,"hash":"ab"}"#)
            .unwrap();
        assert_eq!(env.kind().unwrap(), MessageKind::Image);
        assert_eq!(env.series, Some(3));
        assert_eq!(env.frame, Some(9));
        assert_eq!(env.header_detail, None);
    }

    #[test]
    fn test_header_detail_names() {
        let env = Envelope::parse(br#"{"htype":"dheader-1.0","series":1,"header_detail":"none"}"#)
            .unwrap();
        assert_eq!(env.header_detail, Some(HeaderDetail::None));
        assert!(Envelope::parse(br#"{"htype":"dheader-1.0","header_detail":"most"}"#).is_err());

        let env = Envelope::parse(
            br#"{"message_type":"dheader-1.0","series":2,"detail_level":"all"}"#,
        )
        .unwrap();
        assert_eq!(env.kind().unwrap(), MessageKind::Header);
        assert_eq!(env.header_detail, Some(HeaderDetail::All));
    }

    #[test]
    fn test_malformed_json() {
        let err = Envelope::parse(b"{not json").unwrap_err();
        assert!(matches!(err, StreamError::Json { part: 0, .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn test_unknown_prefix() {
        let env = Envelope::parse(br#"{"htype":"dconfig-1.0"}"#).unwrap();
        assert!(matches!(
            env.kind().unwrap_err(),
            StreamError::UnknownMessageType(t) if t == "dconfig-1.0"
        ));
    }
}

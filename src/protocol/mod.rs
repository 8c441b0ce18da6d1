//! Detector stream protocol
//!
//! Parsing and routing of the multipart messages that make up a series.

pub mod dispatcher;
pub mod envelope;
pub mod message;
pub mod simulator;

pub use dispatcher::{dispatch, StreamHandler};
pub use envelope::{Envelope, HeaderDetail, MessageKind};
pub use message::{
    CorrectionKind, CorrectionTable, FrameTiming, ImageFrame, ImageInfo, SeriesEnd, SeriesHeader,
    StreamMessage,
};
pub use simulator::DetectorSimulator;

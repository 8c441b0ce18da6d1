//! Classify-and-route step between the transport and the handlers

use super::envelope::MessageKind;
use super::message::{ImageFrame, SeriesEnd, SeriesHeader, StreamMessage};
use crate::error::Result;
use bytes::Bytes;
use std::future::Future;
use tracing::trace;

/// Receiver of parsed stream messages
///
/// Exactly one method is called per successfully parsed message.
pub trait StreamHandler {
    fn on_header(&mut self, header: SeriesHeader) -> impl Future<Output = Result<()>> + Send;

    fn on_image(&mut self, image: ImageFrame) -> impl Future<Output = Result<()>> + Send;

    fn on_end(&mut self, end: SeriesEnd) -> impl Future<Output = Result<()>> + Send;
}

/// Parse a multipart message and route it to `handler`
///
/// A message that fails to parse is rejected as a whole and no handler is
/// called. Returns the kind of the dispatched message.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use eiger_stream_rust::error::Result;
/// use eiger_stream_rust::protocol::{dispatch, ImageFrame, MessageKind, SeriesEnd, SeriesHeader, StreamHandler};
///
/// #[derive(Default)]
/// struct Counter {
///     ends: usize,
/// }
///
/// impl StreamHandler for Counter {
///     async fn on_header(&mut self, _: SeriesHeader) -> Result<()> { Ok(()) }
///     async fn on_image(&mut self, _: ImageFrame) -> Result<()> { Ok(()) }
///     async fn on_end(&mut self, _: SeriesEnd) -> Result<()> {
///         self.ends += 1;
///         Ok(())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let mut counter = Counter::default();
/// let parts = vec![Bytes::from_static(br#"{"htype":"dseries_end-1.0","series":1}"#)];
/// assert_eq!(dispatch(&parts, &mut counter).await?, MessageKind::End);
/// assert_eq!(counter.ends, 1);
/// # Ok(())
/// # }
/// ```
pub async fn dispatch<H: StreamHandler>(parts: &[Bytes], handler: &mut H) -> Result<MessageKind> {
    let message = StreamMessage::from_parts(parts)?;
    let kind = message.kind();
    trace!(kind = kind.name(), parts = parts.len(), "Dispatching message");
    match message {
        StreamMessage::Header(header) => handler.on_header(header).await?,
        StreamMessage::Image(image) => handler.on_image(image).await?,
        StreamMessage::End(end) => handler.on_end(end).await?,
    }
    Ok(kind)
}

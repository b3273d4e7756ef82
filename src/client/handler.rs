//! Streaming response delivery.
//!
//! Responses are not buffered by the client. Instead the caller supplies
//! a [`ResponseHandler`] whose methods are invoked as the response
//! arrives: the head once parsed, each body chunk as it is read, and
//! exactly one terminal callback.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use tokio::sync::oneshot;

use crate::{Error, ErrorKind};

/// The parsed response head, delivered before any body byte is read.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Response status code.
    pub status: StatusCode,

    /// Negotiated HTTP version.
    pub version: Version,

    /// Response headers.
    pub headers: HeaderMap,
}

impl From<http::response::Parts> for ResponseHead {
    fn from(parts: http::response::Parts) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
        }
    }
}

/// Receives a response as it streams in.
///
/// For each request the client calls `on_headers` at most once, then
/// `on_body_chunk` zero or more times, and finally exactly one of
/// `on_complete` or `on_error`. A request that fails before the response
/// head arrives, or that is cancelled, sees no callbacks after the
/// failure point: in particular a cancelled request receives neither
/// terminal callback.
pub trait ResponseHandler: Send + 'static {
    /// The response head has been parsed.
    fn on_headers(&mut self, head: ResponseHead);

    /// A chunk of the response body has arrived.
    fn on_body_chunk(&mut self, chunk: Bytes);

    /// The response body has been read to completion.
    fn on_complete(&mut self);

    /// The exchange failed. When the failure precedes the response head,
    /// this is the only callback invoked.
    fn on_error(&mut self, error: &Error);
}

/// Everything a [`CollectingHandler`] saw, delivered once the exchange
/// reaches a terminal state.
#[derive(Debug, Default)]
pub struct Collected {
    /// The response head, if one arrived.
    pub head: Option<ResponseHead>,

    /// The concatenated response body.
    pub body: Bytes,

    /// The error kind, if the exchange failed.
    pub error: Option<ErrorKind>,
}

impl Collected {
    /// Status code of the collected response.
    ///
    /// # Panics
    ///
    /// Panics if no response head arrived.
    pub fn status(&self) -> StatusCode {
        self.head.as_ref().expect("response head arrived").status
    }
}

/// A handler which buffers the whole response and delivers it through a
/// channel on completion. Convenient when streaming delivery is not
/// needed.
#[derive(Debug)]
pub struct CollectingHandler {
    head: Option<ResponseHead>,
    body: BytesMut,
    sender: Option<oneshot::Sender<Collected>>,
}

impl CollectingHandler {
    /// Create a handler and the receiver its collected response will be
    /// delivered on. The receiver errors if the request is cancelled,
    /// since a cancelled exchange never reaches a terminal callback.
    pub fn new() -> (Self, oneshot::Receiver<Collected>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                head: None,
                body: BytesMut::new(),
                sender: Some(sender),
            },
            receiver,
        )
    }

    fn finish(&mut self, error: Option<ErrorKind>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Collected {
                head: self.head.take(),
                body: std::mem::take(&mut self.body).freeze(),
                error,
            });
        }
    }
}

impl ResponseHandler for CollectingHandler {
    fn on_headers(&mut self, head: ResponseHead) {
        self.head = Some(head);
    }

    fn on_body_chunk(&mut self, chunk: Bytes) {
        self.body.extend_from_slice(&chunk);
    }

    fn on_complete(&mut self) {
        self.finish(None);
    }

    fn on_error(&mut self, error: &Error) {
        self.finish(Some(error.kind()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_head_and_body() {
        let (mut handler, mut receiver) = CollectingHandler::new();
        let (parts, ()) = http::Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .body(())
            .unwrap()
            .into_parts();

        handler.on_headers(parts.into());
        handler.on_body_chunk(Bytes::from_static(b"hello "));
        handler.on_body_chunk(Bytes::from_static(b"world"));
        handler.on_complete();

        let collected = receiver.try_recv().unwrap();
        assert_eq!(collected.status(), StatusCode::OK);
        assert_eq!(collected.body.as_ref(), b"hello world");
        assert!(collected.error.is_none());
    }

    #[test]
    fn reports_error_before_headers() {
        let (mut handler, mut receiver) = CollectingHandler::new();
        handler.on_error(&Error::Closed);

        let collected = receiver.try_recv().unwrap();
        assert!(collected.head.is_none());
        assert_eq!(collected.error, Some(ErrorKind::Closed));
    }

    #[test]
    fn cancelled_exchange_drops_the_sender() {
        let (handler, mut receiver) = CollectingHandler::new();
        drop(handler);
        assert!(receiver.try_recv().is_err());
    }
}

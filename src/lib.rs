//! Towline
//!
//! An asynchronous, TLS-capable HTTP/1.1 transport client. Towline opens
//! (or reuses from a pool) a connection to a target host, optionally
//! negotiates a forward-proxy `CONNECT` tunnel, performs a TLS handshake
//! with caller-supplied client key material for mutual authentication, and
//! delivers the response - status, headers and a streamed body - to a
//! caller-supplied [`ResponseHandler`][client::ResponseHandler] without
//! blocking the calling thread.
//!
//! The entry point is [`Client::execute`][client::Client::execute], which
//! returns a [`CompletionSignal`][client::CompletionSignal] resolving once
//! the response head has been handed off. Body delivery continues
//! independently on the request's own task.
//!
//! ```no_run
//! use towline::client::{Client, CollectingHandler};
//!
//! # async fn run() -> Result<(), towline::Error> {
//! let client = Client::builder().build()?;
//! let request = http::Request::get("https://example.com/")
//!     .body(towline::Body::empty())
//!     .unwrap();
//!
//! let (handler, collected) = CollectingHandler::new();
//! client.execute(request, handler).await?;
//! let response = collected.await.unwrap();
//! assert!(response.head.is_some());
//! # Ok(())
//! # }
//! ```

pub mod body;
pub use body::{Body, Request};
pub mod bridge;
pub mod client;
pub use client::Client;
mod error;
pub use error::{Error, ErrorKind};
pub mod tls;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

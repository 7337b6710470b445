//! Request and response payloads.
//!
//! A [`Body`] is a lazily produced sequence of byte chunks with single-use
//! semantics:
//!
//! - [`MarkStream`] tracks whether a source has been subscribed to
//! - [`fork`] splits a source into two independently consumable copies
//! - [`Body::try_clone`] uses `fork` so a middleware can read a payload without
//!   stealing it from the caller
//!
//! # Example
//!
//! ```
//! use fetcher_core::body::Body;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut body = Body::from_stream(futures_util::stream::iter(vec![
//!     Ok(bytes::Bytes::from_static(b"hello ")),
//!     Ok(bytes::Bytes::from_static(b"world")),
//! ]));
//! let copy = body.try_clone()?;
//! assert_eq!(copy.text().await?, "hello world");
//! assert_eq!(body.text().await?, "hello world");
//! assert!(body.text().await.is_err());
//! # Ok(())
//! # }
//! ```

mod mark;
mod tee;

pub use mark::MarkStream;
pub use tee::fork;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::abort::{AbortReason, AbortSignal};
use crate::error::FetchError;

/// A boxed, sendable stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send + 'static>>;

/// Errors produced while consuming a body.
#[derive(Debug, Clone, Error)]
pub enum BodyError {
    /// The body was already subscribed to by another consumer.
    #[error("body already consumed")]
    AlreadyConsumed,

    /// The body's abort signal fired mid-stream.
    #[error("body stream aborted: {reason}")]
    Aborted {
        /// Why the signal fired.
        reason: AbortReason,
    },

    /// The producer failed.
    #[error("body stream failed: {message}")]
    Source {
        /// Description of the failure.
        message: String,
        /// The producer's error, shared between forked consumers.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl BodyError {
    /// Creates a producer error from a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a producer error wrapping `source`.
    pub fn from_error<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }
}

/// The payload of a request or response.
pub struct Body {
    stream: MarkStream,
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("broadcast", &self.stream.is_broadcast())
            .field("used", &self.stream.is_used())
            .finish()
    }
}

impl Body {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            stream: MarkStream::empty(),
        }
    }

    /// A fully buffered body. Buffered bodies may be read any number of times.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: MarkStream::buffered(bytes.into()),
        }
    }

    /// A streamed body that can be consumed exactly once.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            stream: MarkStream::from_stream(Box::pin(stream)),
        }
    }

    /// Returns true once a streamed body has been handed to a consumer.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.stream.is_used()
    }

    /// Returns true when the body is buffered (and therefore replayable).
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.stream.is_broadcast()
    }

    /// Returns the payload without consuming it, when it is buffered.
    #[must_use]
    pub fn as_bytes(&self) -> Option<Bytes> {
        self.stream.buffered_bytes()
    }

    /// Begins consuming the body as a stream of chunks.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] if a streamed body was already
    /// consumed.
    pub fn stream(&self) -> Result<BodyStream, BodyError> {
        self.stream.subscribe()
    }

    /// Forks the body: `self` keeps one copy and the returned body is the other.
    ///
    /// Both copies can be consumed completely, in any order or concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] if the body was already consumed.
    pub fn try_clone(&mut self) -> Result<Self, BodyError> {
        if self.stream.is_used() {
            return Err(BodyError::AlreadyConsumed);
        }
        let source = std::mem::replace(&mut self.stream, MarkStream::empty());
        let (kept, forked) = fork(source);
        self.stream = kept;
        Ok(Self { stream: forked })
    }

    /// Makes iteration observe `signal`.
    ///
    /// Once the signal fires the stream yields a single
    /// [`BodyError::Aborted`] and drops the underlying source, releasing
    /// whatever connection produced it. Buffered bodies are returned as-is.
    #[must_use]
    pub fn with_abort(self, signal: AbortSignal) -> Self {
        if self.stream.is_broadcast() {
            return self;
        }
        Self::from_stream(abortable(self.stream, signal))
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] on a second read of a streamed
    /// body, or the producer's error.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        if let Some(bytes) = self.stream.buffered_bytes() {
            return Ok(bytes);
        }
        let mut stream = self.stream.subscribe()?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Reads the whole body as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Same as [`Body::bytes`].
    pub async fn text(&self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads the whole body and parses it as JSON.
    ///
    /// # Errors
    ///
    /// Returns the read error, or [`FetchError::Decode`] when parsing fails.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(FetchError::decode)
    }
}

enum Abortable {
    Idle(MarkStream, AbortSignal),
    Running(BodyStream, AbortSignal),
    Done,
}

fn abortable(
    source: MarkStream,
    signal: AbortSignal,
) -> impl Stream<Item = Result<Bytes, BodyError>> + Send + 'static {
    stream::unfold(Abortable::Idle(source, signal), |state| async move {
        let (mut inner, signal) = match state {
            Abortable::Idle(source, signal) => match source.subscribe() {
                Ok(inner) => (inner, signal),
                Err(error) => return Some((Err(error), Abortable::Done)),
            },
            Abortable::Running(inner, signal) => (inner, signal),
            Abortable::Done => return None,
        };

        tokio::select! {
            biased;
            () = signal.aborted() => {
                let reason = signal
                    .reason()
                    .unwrap_or_else(|| AbortReason::from("aborted"));
                Some((Err(BodyError::Aborted { reason }), Abortable::Done))
            }
            chunk = inner.next() => chunk.map(|chunk| (chunk, Abortable::Running(inner, signal))),
        }
    })
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }
}

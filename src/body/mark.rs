//! Single-use tracking for body sources.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::stream;

use super::tee::TeeBranch;
use super::{BodyError, BodyStream};

pub(crate) enum Source {
    Empty,
    Buffered(Bytes),
    Stream(Mutex<Option<BodyStream>>),
    Tee(Mutex<Option<TeeBranch>>),
}

/// A body source that remembers whether it has been subscribed to.
///
/// Broadcast sources (empty and fully buffered bodies) can be subscribed any
/// number of times and never become `used`. Every other source hands out its
/// stream exactly once; later subscriptions fail with
/// [`BodyError::AlreadyConsumed`].
pub struct MarkStream {
    source: Source,
    used: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MarkStream {
    fn with_source(source: Source) -> Self {
        Self {
            source,
            used: AtomicBool::new(false),
        }
    }

    /// A broadcast source with no chunks.
    #[must_use]
    pub fn empty() -> Self {
        Self::with_source(Source::Empty)
    }

    /// A broadcast source yielding `bytes` as a single chunk.
    #[must_use]
    pub fn buffered(bytes: Bytes) -> Self {
        Self::with_source(Source::Buffered(bytes))
    }

    /// A single-consumer source.
    #[must_use]
    pub fn from_stream(stream: BodyStream) -> Self {
        Self::with_source(Source::Stream(Mutex::new(Some(stream))))
    }

    pub(crate) fn from_branch(branch: TeeBranch) -> Self {
        Self::with_source(Source::Tee(Mutex::new(Some(branch))))
    }

    /// Returns true if any number of consumers may subscribe.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self.source, Source::Empty | Source::Buffered(_))
    }

    /// Returns true once a non-broadcast source has been subscribed to.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    /// Returns the buffered payload of a broadcast source.
    #[must_use]
    pub fn buffered_bytes(&self) -> Option<Bytes> {
        match &self.source {
            Source::Empty => Some(Bytes::new()),
            Source::Buffered(bytes) => Some(bytes.clone()),
            Source::Stream(_) | Source::Tee(_) => None,
        }
    }

    /// Another handle onto the same broadcast payload.
    pub(crate) fn alias(&self) -> Option<Self> {
        match &self.source {
            Source::Empty => Some(Self::empty()),
            Source::Buffered(bytes) => Some(Self::buffered(bytes.clone())),
            Source::Stream(_) | Source::Tee(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn source_for_test(&self) -> &Source {
        &self.source
    }

    /// Starts consuming the source.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] when a non-broadcast source has
    /// already been subscribed to.
    pub fn subscribe(&self) -> Result<BodyStream, BodyError> {
        match &self.source {
            Source::Empty => Ok(Box::pin(stream::empty())),
            Source::Buffered(bytes) => {
                let chunk = bytes.clone();
                Ok(Box::pin(stream::iter(
                    (!chunk.is_empty()).then_some(Ok(chunk)),
                )))
            }
            Source::Stream(slot) => {
                if self.used.swap(true, Ordering::SeqCst) {
                    return Err(BodyError::AlreadyConsumed);
                }
                lock(slot).take().ok_or(BodyError::AlreadyConsumed)
            }
            Source::Tee(slot) => {
                if self.used.swap(true, Ordering::SeqCst) {
                    return Err(BodyError::AlreadyConsumed);
                }
                let branch = lock(slot).take().ok_or(BodyError::AlreadyConsumed)?;
                branch.connect();
                Ok(Box::pin(branch))
            }
        }
    }
}

impl fmt::Debug for MarkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Empty => "empty",
            Source::Buffered(_) => "buffered",
            Source::Stream(_) => "stream",
            Source::Tee(_) => "tee",
        };
        f.debug_struct("MarkStream")
            .field("kind", &kind)
            .field("used", &self.is_used())
            .finish()
    }
}

//! Forking a body source into two independently consumable copies.
//!
//! A non-broadcast source is read through one lazily created upstream
//! subscription. Whichever branch polls first pulls the next chunk and leaves a
//! copy queued for the other branch, so both observe the same chunks in the
//! same order. The upstream is dropped once both branches are gone.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures_util::Stream;
use futures_util::task::{ArcWake, waker};

use super::mark::MarkStream;
use super::{BodyError, BodyStream};

type Chunk = Result<Bytes, BodyError>;

enum Upstream {
    /// Not subscribed yet.
    Idle(MarkStream),
    Running(BodyStream),
    Done,
}

#[derive(Default)]
struct BranchState {
    queue: VecDeque<Chunk>,
    detached: bool,
}

struct TeeState {
    upstream: Upstream,
    branches: [BranchState; 2],
}

impl TeeState {
    fn connect(&mut self) {
        if !matches!(self.upstream, Upstream::Idle(_)) {
            return;
        }
        let Upstream::Idle(source) = std::mem::replace(&mut self.upstream, Upstream::Done) else {
            return;
        };
        match source.subscribe() {
            Ok(stream) => self.upstream = Upstream::Running(stream),
            Err(error) => {
                for branch in &mut self.branches {
                    if !branch.detached {
                        branch.queue.push_back(Err(error.clone()));
                    }
                }
            }
        }
    }
}

/// Wakes both branches whenever the shared upstream makes progress.
#[derive(Default)]
struct TeeWakers {
    slots: Mutex<[Option<Waker>; 2]>,
}

impl TeeWakers {
    fn register(&self, index: usize, waker: &Waker) {
        let mut slots = lock(&self.slots);
        match &slots[index] {
            Some(existing) if existing.will_wake(waker) => {}
            _ => slots[index] = Some(waker.clone()),
        }
    }

    fn wake_branch(&self, index: usize) {
        if let Some(waker) = lock(&self.slots)[index].take() {
            waker.wake();
        }
    }
}

impl ArcWake for TeeWakers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let wakers: Vec<Waker> = lock(&arc_self.slots)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One output of [`fork`].
pub(crate) struct TeeBranch {
    index: usize,
    state: Arc<Mutex<TeeState>>,
    wakers: Arc<TeeWakers>,
    finished: bool,
}

impl TeeBranch {
    /// Subscribes the shared upstream if no branch has done so yet.
    pub(crate) fn connect(&self) {
        lock(&self.state).connect();
    }
}

impl Stream for TeeBranch {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let index = this.index;
        let other = 1 - index;
        let mut state = lock(&this.state);

        if let Some(chunk) = state.branches[index].queue.pop_front() {
            return Poll::Ready(Some(chunk));
        }

        state.connect();
        if let Some(chunk) = state.branches[index].queue.pop_front() {
            return Poll::Ready(Some(chunk));
        }

        let polled = match &mut state.upstream {
            Upstream::Idle(_) | Upstream::Done => Poll::Ready(None),
            Upstream::Running(stream) => {
                this.wakers.register(index, cx.waker());
                let shared = waker(Arc::clone(&this.wakers));
                let mut upstream_cx = Context::from_waker(&shared);
                stream.as_mut().poll_next(&mut upstream_cx)
            }
        };

        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                if !state.branches[other].detached {
                    state.branches[other].queue.push_back(chunk.clone());
                    this.wakers.wake_branch(other);
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                state.upstream = Upstream::Done;
                this.finished = true;
                drop(state);
                this.wakers.wake_branch(other);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let index = self.index;
        state.branches[index].detached = true;
        state.branches[index].queue.clear();
        if state.branches[1 - index].detached {
            // Both consumers are gone; release the upstream.
            state.upstream = Upstream::Done;
        }
    }
}

/// Splits `source` into two sources that can each be consumed completely.
///
/// Broadcast sources are aliased. Otherwise the upstream is subscribed on the
/// first subscription to either output and cancelled when both outputs have
/// been dropped or have completed.
#[must_use]
pub fn fork(source: MarkStream) -> (MarkStream, MarkStream) {
    if let Some(alias) = source.alias() {
        return (source, alias);
    }

    let state = Arc::new(Mutex::new(TeeState {
        upstream: Upstream::Idle(source),
        branches: [BranchState::default(), BranchState::default()],
    }));
    let wakers = Arc::new(TeeWakers::default());
    let branch = |index| TeeBranch {
        index,
        state: Arc::clone(&state),
        wakers: Arc::clone(&wakers),
        finished: false,
    };
    (
        MarkStream::from_branch(branch(0)),
        MarkStream::from_branch(branch(1)),
    )
}

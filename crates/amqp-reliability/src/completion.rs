//! Completion handles for publications awaiting a broker confirm.
//!
//! A publication is split into a resolving side ([`Promise`]) owned by the
//! confirm tracker and an observing side handed back to the caller. The
//! promise is consumed by `complete`, so a publication resolves at most once.

use crate::error::PublishError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Final state of a publication.
pub type PublishOutcome = Result<(), PublishError>;

/// Resolving side of a completion handle.
pub trait Promise: Send + 'static {
    fn complete(self, outcome: PublishOutcome);
}

/// Factory for promise/handle pairs.
///
/// The publisher is generic over this so the asynchronous primitive handed
/// to callers is not fixed by the core.
pub trait Deferred: Send + Sync + 'static {
    type Promise: Promise;
    type Handle: Send + 'static;

    fn deferred(&self) -> (Self::Promise, Self::Handle);
}

/// Promise backed by a tokio oneshot channel.
#[derive(Debug)]
pub struct CompletionPromise {
    tx: oneshot::Sender<PublishOutcome>,
}

impl Promise for CompletionPromise {
    fn complete(self, outcome: PublishOutcome) {
        // The caller may have dropped its handle; nothing to notify then.
        let _ = self.tx.send(outcome);
    }
}

/// Handle returned by `publish`. Await it to observe the outcome.
///
/// Awaiting registers a waker and never blocks a thread.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<PublishOutcome>,
    settled: Option<PublishOutcome>,
}

impl CompletionHandle {
    /// Create a connected promise/handle pair.
    pub fn pair() -> (CompletionPromise, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        (
            CompletionPromise { tx },
            CompletionHandle { rx, settled: None },
        )
    }

    /// Non-blocking check for the outcome. `None` while still pending.
    pub fn try_outcome(&mut self) -> Option<PublishOutcome> {
        if self.settled.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.settled = Some(outcome),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => self.settled = Some(Err(PublishError::Abandoned)),
            }
        }
        self.settled.clone()
    }

    /// Whether the publication has been resolved either way.
    pub fn is_resolved(&mut self) -> bool {
        self.try_outcome().is_some()
    }
}

impl Future for CompletionHandle {
    type Output = PublishOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.settled.clone() {
            return Poll::Ready(outcome);
        }

        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(PublishError::Abandoned),
            Poll::Pending => return Poll::Pending,
        };
        self.settled = Some(outcome.clone());
        Poll::Ready(outcome)
    }
}

/// Default [`Deferred`] producing [`CompletionHandle`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneshotDeferred;

impl Deferred for OneshotDeferred {
    type Promise = CompletionPromise;
    type Handle = CompletionHandle;

    fn deferred(&self) -> (CompletionPromise, CompletionHandle) {
        CompletionHandle::pair()
    }
}

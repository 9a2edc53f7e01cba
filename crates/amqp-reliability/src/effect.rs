//! Minimal contract over asynchronous results.
//!
//! The dispatcher only needs to build and chain computations that produce an
//! [`AckAction`](crate::AckAction); it does not care whether those are tokio
//! futures or eagerly evaluated results. [`Effect`] captures the four
//! combinators (`succeed`, `fail`, `map`, `flat_map`) plus the two hooks
//! needed to consume a result without blocking (`attempt`, `spawn`).

use futures_util::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::runtime::Handle;
use tracing::{debug, error};

/// Failure carried by an effect.
pub type EffectError = anyhow::Error;

/// Family of asynchronous result types.
pub trait Effect: Clone + Send + Sync + 'static {
    /// The asynchronous result of a `T`.
    type Of<T: Send + 'static>: Send + 'static;

    /// Already-successful result.
    fn succeed<T: Send + 'static>(value: T) -> Self::Of<T>;

    /// Already-failed result.
    fn fail<T: Send + 'static>(error: EffectError) -> Self::Of<T>;

    /// Transform the success value.
    fn map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static;

    /// Chain a dependent computation.
    fn flat_map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> Self::Of<U> + Send + 'static;

    /// Lift failure (including a panic while running) into the success value.
    fn attempt<T: Send + 'static>(fa: Self::Of<T>) -> Self::Of<Result<T, EffectError>>;

    /// Run a unit computation to completion in the background.
    fn spawn(&self, fa: Self::Of<()>);
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Effects as boxed tokio futures.
///
/// Holds a runtime handle so computations can be spawned from transport
/// threads that are not themselves inside the runtime.
#[derive(Debug, Clone)]
pub struct TokioEffect {
    handle: Handle,
}

impl TokioEffect {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Effect for TokioEffect {
    type Of<T: Send + 'static> = BoxFuture<'static, Result<T, EffectError>>;

    fn succeed<T: Send + 'static>(value: T) -> Self::Of<T> {
        future::ready(Ok(value)).boxed()
    }

    fn fail<T: Send + 'static>(error: EffectError) -> Self::Of<T> {
        future::ready(Err(error)).boxed()
    }

    fn map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        async move { fa.await.map(f) }.boxed()
    }

    fn flat_map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> Self::Of<U> + Send + 'static,
    {
        async move {
            let value = fa.await?;
            f(value).await
        }
        .boxed()
    }

    fn attempt<T: Send + 'static>(fa: Self::Of<T>) -> Self::Of<Result<T, EffectError>> {
        async move {
            let result = match AssertUnwindSafe(fa).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload))),
            };
            Ok(result)
        }
        .boxed()
    }

    fn spawn(&self, fa: Self::Of<()>) {
        self.handle.spawn(async move {
            match AssertUnwindSafe(fa).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Detached effect failed"),
                Err(payload) => error!(panic = %panic_message(payload), "Detached effect panicked"),
            }
        });
    }
}

/// Effects evaluated eagerly on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateEffect;

impl Effect for ImmediateEffect {
    type Of<T: Send + 'static> = Result<T, EffectError>;

    fn succeed<T: Send + 'static>(value: T) -> Self::Of<T> {
        Ok(value)
    }

    fn fail<T: Send + 'static>(error: EffectError) -> Self::Of<T> {
        Err(error)
    }

    fn map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        fa.map(f)
    }

    fn flat_map<T, U, F>(fa: Self::Of<T>, f: F) -> Self::Of<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> Self::Of<U> + Send + 'static,
    {
        fa.and_then(f)
    }

    fn attempt<T: Send + 'static>(fa: Self::Of<T>) -> Self::Of<Result<T, EffectError>> {
        Ok(fa)
    }

    fn spawn(&self, fa: Self::Of<()>) {
        if let Err(e) = fa {
            debug!(error = %e, "Immediate effect completed with failure");
        }
    }
}

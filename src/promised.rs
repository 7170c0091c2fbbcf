//! §6/§9: `Promised`, the lazy future wrapper every public async API returns.
//!
//! The original folds a chain of pending transforms into one future only at
//! await time, to avoid rebuilding the combinator chain on every `.map`
//! call. A boxed `Future` trait object already buys that for free here: each
//! combinator wraps the previous future exactly once, and nothing runs
//! until the result is polled or `.into_future()`-ed — there is no separate
//! "pending transform" enum to fold, the `Future` itself is the fold.

use std::cell::Cell;
use std::future::{Future, IntoFuture};

use crate::executor::PinnedFuture;

/// A lazy, chainable future. Every public resolve/update/exec entry point
/// returns one of these instead of a bare `impl Future`.
///
/// `inner` is an `Option` (rather than a bare boxed future) so
/// [`Self::take_inner`] can hand it off to a poller without partially
/// moving out of a type that implements `Drop` — Rust forbids that once a
/// struct has its own `Drop` impl.
pub struct Promised<T, E> {
    inner: Option<PinnedFuture<Result<T, E>>>,
    observed: Cell<bool>,
}

impl<T, E> Promised<T, E> {
    fn take_inner(mut self) -> PinnedFuture<Result<T, E>> {
        self.observed.set(true);
        self.inner.take().expect("Promised polled more than once")
    }
}

impl<T: 'static, E: 'static> Promised<T, E> {
    pub fn from_future(fut: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Promised { inner: Some(Box::pin(fut)), observed: Cell::new(false) }
    }

    /// Lifts a fallible, non-blocking thunk.
    pub fn try_from(thunk: impl FnOnce() -> Result<T, E> + 'static) -> Self {
        Promised::from_future(async move { thunk() })
    }

    pub fn ready(value: T) -> Self {
        Promised::from_future(async move { Ok(value) })
    }

    pub fn err(error: E) -> Self {
        Promised::from_future(async move { Err(error) })
    }

    pub fn into_future(self) -> PinnedFuture<Result<T, E>> {
        self.take_inner()
    }

    /// `.map(fn)` — transforms the success value; errors pass through.
    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Promised<U, E> {
        let inner = self.take_inner();
        Promised::from_future(async move { inner.await.map(f) })
    }

    /// `.switch(fn)` — chains into another `Promised` on success.
    pub fn switch<U: 'static>(
        self,
        f: impl FnOnce(T) -> Promised<U, E> + 'static,
    ) -> Promised<U, E> {
        let inner = self.take_inner();
        Promised::from_future(async move {
            match inner.await {
                Ok(v) => f(v).take_inner().await,
                Err(e) => Err(e),
            }
        })
    }

    /// `.catch(fn)` — recovers an error into a success value.
    pub fn catch(self, f: impl FnOnce(E) -> T + 'static) -> Promised<T, E> {
        let inner = self.take_inner();
        Promised::from_future(async move {
            match inner.await {
                ok @ Ok(_) => ok,
                Err(e) => Ok(f(e)),
            }
        })
    }

    /// `.map_error(fn)` — transforms the error type; success passes through.
    pub fn map_error<F: 'static>(self, f: impl FnOnce(E) -> F + 'static) -> Promised<T, F> {
        let inner = self.take_inner();
        Promised::from_future(async move { inner.await.map_err(f) })
    }

    /// `.switch_error(fn)` — chains into another `Promised` on failure.
    pub fn switch_error<F: 'static>(
        self,
        f: impl FnOnce(E) -> Promised<T, F> + 'static,
    ) -> Promised<T, F> {
        let inner = self.take_inner();
        Promised::from_future(async move {
            match inner.await {
                Ok(v) => Ok(v),
                Err(e) => f(e).take_inner().await,
            }
        })
    }

    /// Awaits every item concurrently; fails fast with the first error.
    pub fn all(items: Vec<Promised<T, E>>) -> Promised<Vec<T>, E> {
        Promised::from_future(async move {
            let futs: Vec<_> = items.into_iter().map(Promised::take_inner).collect();
            futures::future::join_all(futs).await.into_iter().collect()
        })
    }

    /// Awaits every item concurrently; never fails, preserving input order.
    pub fn all_settled(items: Vec<Promised<T, E>>) -> Promised<Vec<Result<T, E>>, E> {
        Promised::from_future(async move {
            let futs: Vec<_> = items.into_iter().map(Promised::take_inner).collect();
            Ok(futures::future::join_all(futs).await)
        })
    }

    /// Resolves with whichever item settles first.
    pub fn race(items: Vec<Promised<T, E>>) -> Promised<T, E> {
        Promised::from_future(async move {
            if items.is_empty() {
                futures::future::pending::<()>().await;
                unreachable!("race() on an empty set never settles")
            }
            let futs: Vec<_> = items.into_iter().map(Promised::take_inner).collect();
            let (result, _index, _remaining) = futures::future::select_all(futs).await;
            result
        })
    }
}

impl<T: 'static, E: 'static> IntoFuture for Promised<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = PinnedFuture<Result<T, E>>;

    fn into_future(self) -> Self::IntoFuture {
        self.take_inner()
    }
}

/// §7: an unawaited `Promised` is a programmer error (a dangling resolve,
/// update, or flow exec whose result — success or failure — nobody ever
/// looked at). Debug builds surface it instead of failing silently.
impl<T, E> Drop for Promised<T, E> {
    fn drop(&mut self) {
        #[cfg(all(debug_assertions, feature = "tracing"))]
        if self.inner.is_some() && !self.observed.get() {
            tracing::error!("a Promised was dropped without ever being awaited");
        }
    }
}

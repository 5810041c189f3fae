//! Pending results for requests confirmed by native notifications

use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves when the surface confirms or denies a request.
///
/// Returned by `play()`, `enter_fullscreen()` and friends. Dropping it does
/// not cancel the request. If the session is destroyed before the
/// confirmation arrives it resolves to [`Error::Destroyed`].
#[derive(Debug)]
#[must_use = "a pending request does nothing unless awaited or polled"]
pub struct PendingRequest {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Ready(Option<Result<()>>),
    Waiting(oneshot::Receiver<Result<()>>),
}

impl PendingRequest {
    /// A request already settled with `result`
    pub fn settled(result: Result<()>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    pub(crate) fn channel() -> (Completer, Self) {
        let (tx, rx) = oneshot::channel();
        (
            Completer(tx),
            Self {
                inner: Inner::Waiting(rx),
            },
        )
    }
}

impl Future for PendingRequest {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(Error::Destroyed))),
            Inner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(Error::Destroyed))),
        }
    }
}

/// Sending half held by the session until the confirming notification
#[derive(Debug)]
pub(crate) struct Completer(oneshot::Sender<Result<()>>);

impl Completer {
    pub(crate) fn resolve(self) {
        let _ = self.0.send(Ok(()));
    }

    pub(crate) fn reject(self, error: Error) {
        let _ = self.0.send(Err(error));
    }
}

/// Requests waiting on the same confirmation
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    waiters: Vec<Completer>,
}

impl PendingSet {
    pub(crate) fn push(&mut self, completer: Completer) {
        self.waiters.push(completer);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn resolve_all(&mut self) {
        for waiter in self.waiters.drain(..) {
            waiter.resolve();
        }
    }

    pub(crate) fn reject_all(&mut self, error: &Error) {
        for waiter in self.waiters.drain(..) {
            waiter.reject(error.clone());
        }
    }

    /// Drop every waiter; receivers observe `Destroyed`
    pub(crate) fn abandon(&mut self) {
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, task};

    #[test]
    fn test_resolves_on_confirmation() {
        let (completer, request) = PendingRequest::channel();
        let mut request = task::spawn(request);
        assert_pending!(request.poll());

        completer.resolve();
        assert!(request.is_woken());
        assert!(assert_ready!(request.poll()).is_ok());
    }

    #[test]
    fn test_abandoned_request_reports_destroyed() {
        let mut set = PendingSet::default();
        let (completer, request) = PendingRequest::channel();
        set.push(completer);
        set.abandon();

        let mut request = task::spawn(request);
        let err = assert_ready_err!(request.poll());
        assert!(matches!(err, Error::Destroyed));
    }

    #[test]
    fn test_settled_request() {
        let mut request = task::spawn(PendingRequest::settled(Err(Error::PlaybackDenied(
            "autoplay blocked".into(),
        ))));
        let err = assert_ready_err!(request.poll());
        assert_eq!(err.error_code(), "PLAYBACK_DENIED");
    }
}

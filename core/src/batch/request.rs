use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::errors::LoadError;

/// Result of one load: `Ok(None)` means the source has no value for the key.
pub type LoadResult<V> = Result<Option<V>, LoadError>;

/// One admitted lookup awaiting its result.
///
/// [`resolve`](Self::resolve) consumes the request, so a result is delivered
/// at most once. Dropping an unresolved request makes its handle yield
/// [`LoadError::Abandoned`].
#[derive(Debug)]
pub struct PendingRequest<K, V> {
    key: K,
    result_tx: oneshot::Sender<LoadResult<V>>,
    enqueued_at: Instant,
}

impl<K, V> PendingRequest<K, V> {
    /// Create a request stamped with the current instant, plus its handle.
    pub fn new(key: K) -> (Self, LoadHandle<V>) {
        let (result_tx, result_rx) = oneshot::channel();
        let request = Self {
            key,
            result_tx,
            enqueued_at: Instant::now(),
        };
        (
            request,
            LoadHandle {
                result_rx,
                outcome: None,
            },
        )
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn elapsed(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Whether the request has waited longer than `timeout` since admission.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.elapsed() > timeout
    }

    /// Whether the caller dropped its handle.
    pub fn is_abandoned(&self) -> bool {
        self.result_tx.is_closed()
    }

    /// Deliver the outcome. A caller that already dropped its handle is
    /// silently ignored.
    pub fn resolve(self, outcome: LoadResult<V>) {
        let _ = self.result_tx.send(outcome);
    }

    pub fn complete(self, value: Option<V>) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, err: LoadError) {
        self.resolve(Err(err));
    }
}

/// Caller side of a [`PendingRequest`]; resolves to the load result.
///
/// The outcome is cached once delivered, so the handle can be read any
/// number of times through [`try_result`](Self::try_result) or by awaiting
/// `&mut handle`.
#[derive(Debug)]
#[must_use = "a load handle does nothing unless awaited"]
pub struct LoadHandle<V> {
    result_rx: oneshot::Receiver<LoadResult<V>>,
    outcome: Option<LoadResult<V>>,
}

// Nothing in the handle is structurally pinned.
impl<V> Unpin for LoadHandle<V> {}

impl<V: Clone> LoadHandle<V> {
    /// The result if it has already been delivered, without waiting.
    pub fn try_result(&mut self) -> Option<LoadResult<V>> {
        if self.outcome.is_none() {
            match self.result_rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.outcome = Some(Err(LoadError::Abandoned));
                }
            }
        }
        self.outcome.clone()
    }

    pub fn is_resolved(&mut self) -> bool {
        self.try_result().is_some()
    }
}

impl<V: Clone> Future for LoadHandle<V> {
    type Output = LoadResult<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = &this.outcome {
            return Poll::Ready(outcome.clone());
        }
        let outcome = match Pin::new(&mut this.result_rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(LoadError::Abandoned),
            Poll::Pending => return Poll::Pending,
        };
        this.outcome = Some(outcome.clone());
        Poll::Ready(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_value() {
        let (req, handle) = PendingRequest::<&str, u32>::new("a");
        assert_eq!(*req.key(), "a");
        req.complete(Some(7));
        assert_eq!(handle.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn fail_delivers_error() {
        let (req, handle) = PendingRequest::<&str, u32>::new("a");
        req.fail(LoadError::Dropped);
        assert!(matches!(handle.await, Err(LoadError::Dropped)));
    }

    #[tokio::test]
    async fn dropped_request_abandons_handle() {
        let (req, handle) = PendingRequest::<&str, u32>::new("a");
        drop(req);
        assert!(matches!(handle.await, Err(LoadError::Abandoned)));
    }

    #[test]
    fn try_result_before_and_after_resolve() {
        let (req, mut handle) = PendingRequest::<&str, u32>::new("a");
        assert!(handle.try_result().is_none());
        req.complete(None);
        assert!(matches!(handle.try_result(), Some(Ok(None))));
    }

    #[tokio::test]
    async fn handle_is_readable_many_times() {
        let (req, mut handle) = PendingRequest::<&str, u32>::new("a");
        req.complete(Some(7));

        assert!(matches!(handle.try_result(), Some(Ok(Some(7)))));
        assert!(matches!(handle.try_result(), Some(Ok(Some(7)))));
        assert!(handle.is_resolved());
        assert_eq!((&mut handle).await.unwrap(), Some(7));
        assert_eq!(handle.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn awaited_outcome_is_cached() {
        let (req, mut handle) = PendingRequest::<&str, u32>::new("a");
        req.fail(LoadError::Dropped);

        assert!(matches!((&mut handle).await, Err(LoadError::Dropped)));
        assert!(matches!(handle.try_result(), Some(Err(LoadError::Dropped))));
        assert!(matches!(handle.await, Err(LoadError::Dropped)));
    }

    #[test]
    fn abandoned_when_handle_dropped() {
        let (req, handle) = PendingRequest::<&str, u32>::new("a");
        assert!(!req.is_abandoned());
        drop(handle);
        assert!(req.is_abandoned());
        // Resolving after the caller left is a no-op.
        req.complete(Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_measured_from_creation() {
        let (req, _handle) = PendingRequest::<&str, u32>::new("a");
        assert!(!req.is_expired(Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(req.is_expired(Duration::from_millis(100)));
    }
}

//! Completion queue
//!
//! Wraps an unbounded channel of completions. The queue keeps its own
//! sender so `next()` only returns `None` after [`CompletionQueue::shutdown`].

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Opaque identity correlating a completion with the session that started it
pub type Tag = u64;

/// A finished asynchronous operation
#[derive(Debug)]
pub struct Completion<E> {
    pub tag: Tag,
    /// Whether the operation succeeded
    pub ok: bool,
    /// Operation result handed back to the session
    pub event: E,
}

/// Receiving end, owned by the event loop
pub struct CompletionQueue<E> {
    tx: mpsc::UnboundedSender<Completion<E>>,
    rx: mpsc::UnboundedReceiver<Completion<E>>,
}

impl<E: Send + 'static> CompletionQueue<E> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Handle used to start operations that post into this queue
    pub fn handle(&self) -> CompletionHandle<E> {
        CompletionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the next completion
    ///
    /// Returns `None` only after `shutdown()` once buffered completions
    /// have been consumed.
    pub async fn next(&mut self) -> Option<Completion<E>> {
        self.rx.recv().await
    }

    /// Stop accepting completions; operations still running will find the
    /// queue closed and drop their results
    pub fn shutdown(&mut self) {
        self.rx.close();
    }

    /// Discard buffered completions, returning how many were dropped
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl<E: Send + 'static> Default for CompletionQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending end, cloned into every started operation
pub struct CompletionHandle<E> {
    tx: mpsc::UnboundedSender<Completion<E>>,
}

impl<E> Clone for CompletionHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Send + 'static> CompletionHandle<E> {
    /// Post a completion directly
    pub fn complete(&self, tag: Tag, ok: bool, event: E) -> bool {
        self.tx.send(Completion { tag, ok, event }).is_ok()
    }

    /// Run `op` on the current runtime and post its result under `tag`
    ///
    /// Must be called from within the loop's runtime.
    pub fn start<F>(&self, tag: Tag, op: F) -> AbortHandle
    where
        F: Future<Output = (bool, E)> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let (ok, event) = op.await;
            let _ = tx.send(Completion { tag, ok, event });
        })
        .abort_handle()
    }

    /// Like [`start`](Self::start), but cancelling `token` completes the
    /// operation immediately with `ok = false` and `on_cancel`
    pub fn start_cancellable<F>(
        &self,
        tag: Tag,
        token: CancellationToken,
        on_cancel: E,
        op: F,
    ) -> AbortHandle
    where
        F: Future<Output = (bool, E)> + Send + 'static,
    {
        self.start(tag, async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => (false, on_cancel),
                result = op => result,
            }
        })
    }

    /// Schedule an immediate wake-up for `tag`
    ///
    /// The completion is queued behind everything already pending, so other
    /// sessions get their turns before this one runs again.
    pub fn set_alarm(&self, tag: Tag, event: E) -> AbortHandle {
        self.start(tag, async move {
            tokio::task::yield_now().await;
            (true, event)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_completion_carries_tag() {
        let mut queue: CompletionQueue<&'static str> = CompletionQueue::new();
        let handle = queue.handle();

        handle.start(7, async { (true, "done") });
        let completion = queue.next().await.unwrap();

        assert_eq!(completion.tag, 7);
        assert!(completion.ok);
        assert_eq!(completion.event, "done");
    }

    #[tokio::test]
    async fn test_alarm_fires_immediately() {
        let mut queue: CompletionQueue<u32> = CompletionQueue::new();
        queue.handle().set_alarm(3, 99);

        let completion = tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((completion.tag, completion.ok, completion.event), (3, true, 99));
    }

    #[tokio::test]
    async fn test_cancellation_fails_pending_operation() {
        let mut queue: CompletionQueue<&'static str> = CompletionQueue::new();
        let token = CancellationToken::new();

        queue.handle().start_cancellable(1, token.clone(), "cancelled", async {
            std::future::pending::<()>().await;
            (true, "never")
        });
        token.cancel();

        let completion = queue.next().await.unwrap();
        assert!(!completion.ok);
        assert_eq!(completion.event, "cancelled");
    }

    #[tokio::test]
    async fn test_shutdown_and_drain() {
        let mut queue: CompletionQueue<u32> = CompletionQueue::new();
        let handle = queue.handle();
        handle.complete(1, true, 1);
        handle.complete(2, true, 2);

        queue.shutdown();
        assert!(!handle.complete(3, true, 3));
        assert_eq!(queue.drain(), 2);
        assert!(queue.next().await.is_none());
    }
}

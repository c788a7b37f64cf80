//! Single-flight task queue.
//!
//! [`TaskQueue`] is a cheap, cloneable handle over an unbounded channel. A
//! single consumer future, spawned through a [`SpawnProvider`], pulls tasks off
//! the channel and awaits them one at a time. Producers never block and never
//! run a task themselves, and because there is exactly one consumer no two
//! tasks can overlap. No locks are involved.

use core::{future::Future, panic::AssertUnwindSafe};
use std::{panic::catch_unwind, sync::Arc};

use futures::{
    FutureExt, StreamExt,
    channel::{mpsc, oneshot},
    future::BoxFuture,
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::queue::{BoxError, FailureKind, QueueError, QueueState, SpawnProvider, TaskFailure};

type Task = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;
type ErrorHandler = Box<dyn FnMut(TaskFailure) + Send>;

enum Message {
    Run(Task),
    Drained(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    processing: AtomicBool,
    closed: AtomicBool,
}

/// Runs submitted tasks strictly one at a time, in submission order.
///
/// A task that fails (returns an error or panics) does not stop the queue:
/// the next task is picked up regardless. By default the failure is only
/// logged (with the `tracing` feature) and otherwise dropped; install a handler
/// with [`TaskQueue::with_error_handler`] to observe failures.
///
/// # Example
///
/// ```
/// use pagewave::{TaskQueue, TokioSpawn};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = TaskQueue::new::<TokioSpawn>();
/// queue
///     .add_task(|| async {
///         println!("first");
///         Ok(())
///     })
///     .unwrap();
/// queue
///     .add_task(|| async {
///         println!("second");
///         Ok(())
///     })
///     .unwrap();
/// queue.drained().await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Message>,
    counters: Arc<Counters>,
}

impl TaskQueue {
    /// Creates a queue whose task failures are swallowed after logging, and
    /// spawns its consumer loop with `S`.
    pub fn new<S>() -> Self
    where
        S: SpawnProvider,
    {
        Self::spawn::<S>(None)
    }

    /// Creates a queue that reports every failed task to `handler`.
    ///
    /// The handler runs on the consumer loop between tasks, so it delays the
    /// next task until it returns. A panic inside the handler is caught and
    /// logged; the queue keeps running with the same handler.
    pub fn with_error_handler<S, H>(handler: H) -> Self
    where
        S: SpawnProvider,
        H: FnMut(TaskFailure) + Send + 'static,
    {
        Self::spawn::<S>(Some(Box::new(handler)))
    }

    fn spawn<S>(on_error: Option<ErrorHandler>) -> Self
    where
        S: SpawnProvider,
    {
        let (tx, rx) = mpsc::unbounded();
        let counters = Arc::new(Counters::default());
        S::spawn(consume(rx, Arc::clone(&counters), on_error));
        Self { tx, counters }
    }

    /// Appends `task` to the end of the queue.
    ///
    /// The closure is neither called nor polled here; it runs on the consumer
    /// loop once every previously submitted task has finished.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue was closed.
    pub fn add_task<F, Fut>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if self.counters.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let task: Task = Box::new(move || task().boxed());

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.unbounded_send(Message::Run(task)).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Closed);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(pending = self.pending(), "task queued");
        Ok(())
    }

    /// Resolves once every task submitted before this call has finished.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue was closed before the call.
    pub async fn drained(&self) -> Result<(), QueueError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .unbounded_send(Message::Drained(done_tx))
            .map_err(|_| QueueError::Closed)?;
        done_rx.await.map_err(|_| QueueError::Closed)
    }

    /// Stops accepting new tasks. Tasks already queued still run, after which
    /// the consumer loop exits.
    pub fn close(&self) {
        self.counters.closed.store(true, Ordering::Release);
        self.tx.close_channel();
    }

    /// Returns `true` once [`close`](Self::close) was called or the consumer
    /// loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Number of tasks waiting to run, not counting the one in flight.
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    /// Snapshot of the queue's [`QueueState`]. May be stale by the time it is
    /// read, since the consumer runs concurrently.
    pub fn state(&self) -> QueueState {
        if self.counters.processing.load(Ordering::Acquire) {
            QueueState::Processing
        } else if self.pending() > 0 {
            QueueState::Pending
        } else {
            QueueState::Idle
        }
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Message>,
    counters: Arc<Counters>,
    mut on_error: Option<ErrorHandler>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("task queue started");

    // Numbered on dequeue so `seq` follows execution order.
    let mut next_seq: u64 = 0;

    while let Some(message) = rx.next().await {
        let task = match message {
            Message::Run(task) => task,
            Message::Drained(done) => {
                let _ = done.send(());
                continue;
            }
        };
        let seq = next_seq;
        next_seq += 1;

        // Mark processing before releasing the pending slot so the queue is
        // never observed idle while a task is being handed over.
        counters.processing.store(true, Ordering::Release);
        counters.pending.fetch_sub(1, Ordering::AcqRel);

        let outcome = AssertUnwindSafe(async move { task().await })
            .catch_unwind()
            .await;

        counters.processing.store(false, Ordering::Release);

        let kind = match outcome {
            Ok(Ok(())) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(seq, "task completed");
                continue;
            }
            Ok(Err(err)) => FailureKind::Error(err),
            Err(payload) => FailureKind::Panic(panic_message(payload.as_ref())),
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(seq, "{kind}");

        if let Some(handler) = on_error.as_mut() {
            let failure = TaskFailure { seq, kind };
            if let Err(_payload) = catch_unwind(AssertUnwindSafe(|| handler(failure))) {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    seq,
                    "error handler panicked: {}",
                    panic_message(_payload.as_ref())
                );
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("task queue stopped");
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

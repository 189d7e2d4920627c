//! Background execution with a serialized completion context.
//!
//! Work runs on the tokio worker pool. Its terminal result is posted to a
//! [`CompletionContext`], a single task that runs callbacks one at a time in
//! the order they were posted. Cancelling a [`TaskHandle`] suppresses the
//! callback; the work itself only stops at cooperative checkpoints.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TaskError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared cancellation flag of one invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the flag was newly set by this call.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Serial executor for terminal callbacks.
///
/// Cloning shares the same queue and delivery task.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl CompletionContext {
    /// Start the delivery task on `handle`.
    ///
    /// The task ends once every clone of the context has been dropped and the
    /// queue is drained.
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("completion: callback panicked");
                }
            }
            log::debug!("completion: queue closed");
        });
        Self { tx }
    }

    /// Queue `job` behind every previously posted job.
    ///
    /// Returns false if the delivery task is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }
}

/// Handle to one submitted invocation.
#[derive(Debug)]
pub struct TaskHandle {
    flag: CancelFlag,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Request cancellation. Idempotent and callable from any thread.
    ///
    /// A cancelled invocation never delivers its callback, even if the work
    /// has already finished and the callback is waiting in the queue.
    pub fn cancel(&self) {
        if self.flag.cancel() {
            log::debug!("task: cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    /// True once the work has finished and its result has been posted.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the work to finish. The callback may still be queued.
    pub async fn join(self) -> Result<(), TaskError> {
        self.join.await.map_err(TaskError::from)
    }
}

/// Runs invocations on a tokio runtime and delivers their results on a
/// [`CompletionContext`].
#[derive(Debug, Clone)]
pub struct TaskRunner {
    handle: Handle,
    completion: CompletionContext,
}

impl TaskRunner {
    /// Runner on `handle` with its own completion context.
    pub fn new(handle: Handle) -> Self {
        let completion = CompletionContext::spawn(&handle);
        Self { handle, completion }
    }

    /// Runner that delivers through an existing completion context.
    pub fn with_completion(handle: Handle, completion: CompletionContext) -> Self {
        Self { handle, completion }
    }

    /// Runner on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime, like
    /// [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn completion(&self) -> &CompletionContext {
        &self.completion
    }

    /// Submit `work` and deliver its result to `callback`.
    ///
    /// `work` receives the invocation's cancel flag for cooperative
    /// checkpoints. Exactly one callback runs unless the handle is cancelled
    /// before delivery.
    pub fn execute<T, W, Fut, C>(&self, work: W, callback: C) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce(CancelFlag) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        C: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let flag = CancelFlag::new();
        let future = work(flag.clone());
        let completion = self.completion.clone();
        let task_flag = flag.clone();
        let handle = self.handle.clone();

        let join = self.handle.spawn(async move {
            // A panicking future still ends in exactly one result
            let result = match handle.spawn(future).await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("task: work failed: {}", e);
                    Err(TaskError::from(e))
                }
            };
            if task_flag.is_cancelled() {
                log::debug!("task: cancelled, result dropped");
                return;
            }

            let delivery_flag = task_flag.clone();
            let posted = completion.post(move || {
                // Cancellation may land while the job waits in the queue
                if !delivery_flag.is_cancelled() {
                    callback(result);
                }
            });
            if !posted {
                log::warn!("task: completion context closed, result dropped");
            }
        });

        TaskHandle { flag, join }
    }
}

/// Run CPU-bound work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

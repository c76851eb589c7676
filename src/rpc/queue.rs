//! Ordered command queue.
//!
//! One background thread owns the queue state (the client session) and runs
//! submitted jobs strictly in submission order, whether the submitter waits
//! for the result or not. Shutdown drains within a deadline; past it, the
//! jobs still queued are cancelled instead of run.

use crate::core::error::{CabinetError, CabinetResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::Span;

type Job<S> = Box<dyn FnOnce(Option<&mut S>) + Send>;

/// Queue counters.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub cancelled: AtomicU64,
}

impl QueueMetrics {
    /// Jobs submitted but not yet run or cancelled.
    pub fn depth(&self) -> u64 {
        let done = self.completed.load(Ordering::Relaxed) + self.cancelled.load(Ordering::Relaxed);
        self.submitted.load(Ordering::Relaxed).saturating_sub(done)
    }
}

/// Result slot of a submitted job.
///
/// Dropping it turns the job into fire-and-forget: it still runs in order,
/// and a failure is logged instead of returned.
pub struct Pending<T> {
    rx: Receiver<CabinetResult<T>>,
    operation: &'static str,
    timeout: Option<Duration>,
}

impl<T> Pending<T> {
    /// Bound how long `wait` blocks.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Block until the job has run.
    ///
    /// A timeout abandons the wait, not the job.
    pub fn wait(self) -> CabinetResult<T> {
        match self.timeout {
            None => self.rx.recv().unwrap_or(Err(CabinetError::Cancelled)),
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(CabinetError::Timeout {
                    operation: self.operation,
                    elapsed_ms: timeout.as_millis() as u64,
                }),
                Err(RecvTimeoutError::Disconnected) => Err(CabinetError::Cancelled),
            },
        }
    }
}

/// Outcome of a queue shutdown.
pub enum Drained<S> {
    /// Every job ran; the state is handed back.
    Completed(S),
    /// The deadline passed. Remaining jobs are being cancelled.
    TimedOut(Straggler<S>),
    /// Already shut down, or the worker thread died.
    Gone,
}

/// Worker thread that missed the drain deadline.
pub struct Straggler<S> {
    done: Receiver<S>,
}

impl<S> Straggler<S> {
    /// Wait once more for the worker to hand back its state.
    pub fn wait(self, timeout: Duration) -> Option<S> {
        self.done.recv_timeout(timeout).ok()
    }
}

/// Single-thread FIFO executor over a state value `S`.
pub struct OrderedQueue<S> {
    sender: Mutex<Option<Sender<Job<S>>>>,
    done: Mutex<Option<Receiver<S>>>,
    cancelled: Arc<AtomicBool>,
    metrics: Arc<QueueMetrics>,
    span: Span,
}

impl<S: Send + 'static> OrderedQueue<S> {
    /// Spawn the worker thread owning `state`.
    pub fn start(name: &str, mut state: S, span: Span) -> CabinetResult<Self> {
        let (sender, jobs) = mpsc::channel::<Job<S>>();
        let (done_tx, done) = mpsc::sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(QueueMetrics::default());

        let worker_cancelled = Arc::clone(&cancelled);
        let worker_metrics = Arc::clone(&metrics);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Ends once every sender is gone and the queue is empty.
                for job in jobs {
                    if worker_cancelled.load(Ordering::Acquire) {
                        job(None);
                        worker_metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                    } else {
                        job(Some(&mut state));
                        worker_metrics.completed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                let _ = done_tx.send(state);
            })
            .map_err(|e| CabinetError::transport(format!("failed to start {}: {}", name, e)))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            done: Mutex::new(Some(done)),
            cancelled,
            metrics,
            span,
        })
    }

    /// Enqueue `f`. Fails with `Closed` after shutdown began.
    pub fn submit<T, F>(&self, operation: &'static str, f: F) -> CabinetResult<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> CabinetResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let span = self.span.clone();
        let job: Job<S> = Box::new(move |state: Option<&mut S>| {
            let result = match state {
                Some(state) => f(state),
                None => Err(CabinetError::Cancelled),
            };
            // Nobody is waiting: this was a fire-and-forget submission.
            if let Err(SendError(Err(error))) = tx.send(result) {
                if matches!(error, CabinetError::Cancelled) {
                    tracing::debug!(parent: &span, command = operation, "queued command cancelled");
                } else {
                    tracing::warn!(parent: &span, command = operation, error = %error, "async command failed");
                }
            }
        });

        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(CabinetError::Closed)?;
        sender.send(job).map_err(|_| CabinetError::Closed)?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);

        Ok(Pending {
            rx,
            operation,
            timeout: None,
        })
    }

    /// Stop accepting jobs and wait up to `timeout` for the queue to drain.
    ///
    /// Past the deadline every job not yet started is cancelled. The job
    /// currently running, if any, is left to finish.
    pub fn shutdown(&self, timeout: Duration) -> Drained<S> {
        self.sender.lock().take();
        let Some(done) = self.done.lock().take() else {
            return Drained::Gone;
        };

        match done.recv_timeout(timeout) {
            Ok(state) => Drained::Completed(state),
            Err(RecvTimeoutError::Timeout) => {
                self.cancelled.store(true, Ordering::Release);
                Drained::TimedOut(Straggler { done })
            }
            Err(RecvTimeoutError::Disconnected) => Drained::Gone,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = OrderedQueue::start("test-queue", Vec::new(), Span::none()).unwrap();

        for i in 0..100u32 {
            // Fire-and-forget submissions.
            drop(
                queue
                    .submit("push", move |log: &mut Vec<u32>| {
                        log.push(i);
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        let snapshot = queue
            .submit("read", |log: &mut Vec<u32>| Ok(log.clone()))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(snapshot, (0..100).collect::<Vec<_>>());

        match queue.shutdown(Duration::from_secs(5)) {
            Drained::Completed(log) => assert_eq!(log.len(), 100),
            _ => panic!("queue should drain"),
        }
        assert!(queue.is_closed());
        assert!(matches!(
            queue.submit("late", |_: &mut Vec<u32>| Ok(())),
            Err(CabinetError::Closed)
        ));
    }

    #[test]
    fn test_errors_are_returned_to_waiters() {
        let queue = OrderedQueue::start("test-queue", (), Span::none()).unwrap();
        let result = queue
            .submit("fail", |_: &mut ()| -> CabinetResult<()> {
                Err(CabinetError::remote("boom"))
            })
            .unwrap()
            .wait();
        assert!(matches!(result, Err(CabinetError::RemoteOperation { .. })));
    }

    #[test]
    fn test_wait_timeout_leaves_job_running() {
        let queue = OrderedQueue::start("test-queue", 0u32, Span::none()).unwrap();
        let slow = queue
            .submit("slow", |n: &mut u32| {
                thread::sleep(Duration::from_millis(200));
                *n += 1;
                Ok(*n)
            })
            .unwrap()
            .with_timeout(Some(Duration::from_millis(10)));
        assert!(matches!(slow.wait(), Err(CabinetError::Timeout { .. })));

        let after = queue.submit("after", |n: &mut u32| Ok(*n)).unwrap().wait();
        assert_eq!(after.unwrap(), 1);
    }

    #[test]
    fn test_shutdown_deadline_cancels_queued_jobs() {
        let queue = OrderedQueue::start("test-queue", (), Span::none()).unwrap();
        let blocker = queue
            .submit("block", |_: &mut ()| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        let queued = queue.submit("queued", |_: &mut ()| Ok(())).unwrap();

        let started = Instant::now();
        let straggler = match queue.shutdown(Duration::from_millis(50)) {
            Drained::TimedOut(straggler) => straggler,
            _ => panic!("drain should time out"),
        };
        assert!(started.elapsed() < Duration::from_millis(300));

        assert!(blocker.wait().is_ok());
        assert!(matches!(queued.wait(), Err(CabinetError::Cancelled)));
        assert!(straggler.wait(Duration::from_secs(5)).is_some());
        assert_eq!(queue.metrics().cancelled.load(Ordering::Relaxed), 1);
    }
}

/*
 *  surface/job_queue.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Keyed job queue with cooperative cancellation
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Runs keyed asynchronous jobs one at a time, in enqueue order.
//!
//! A queue hands every job the same [`CancellationToken`]; only
//! [`JobQueue::drain`] cancels it. After a drain the queue is spent and
//! refuses new work, so callers replace it with a fresh instance.
//!
//! Each job runs in its own tokio task so a failing or panicking job is
//! logged and the worker moves on to the next one. Tasks go to the runtime
//! handle given at construction, so jobs can be queued from threads that
//! are not part of the runtime.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::logging::ModuleLogger;
use crate::surface::error::SurfaceError;

/// Boxed future returned by a job
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send>>;

/// A unit of work; receives the queue's cancellation token
pub type Job = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

struct QueuedJob {
    key: String,
    job: Job,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    running: bool,
    worker_active: bool,
    spent: bool,
}

/// Cheaply cloneable handle to one queue
#[derive(Clone)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
    token: CancellationToken,
    busy: Arc<watch::Sender<bool>>,
    runtime: Handle,
    logger: ModuleLogger,
}

impl JobQueue {
    /// Create a queue. With `running == false` jobs are held until
    /// [`JobQueue::set_running`] is called.
    pub fn new(logger: ModuleLogger, running: bool, runtime: Handle) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(QueueState {
                running,
                ..Default::default()
            })),
            token: CancellationToken::new(),
            busy: Arc::new(busy),
            runtime,
            logger,
        }
    }

    /// Append a job to run after everything already queued
    pub fn enqueue<F, Fut>(&self, key: impl Into<String>, f: F) -> Result<(), SurfaceError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SurfaceError>> + Send + 'static,
    {
        let job: Job = Box::new(move |token| Box::pin(f(token)));
        let start_worker = {
            let mut state = self.state.lock();
            if state.spent {
                return Err(SurfaceError::QueueSpent);
            }
            state.pending.push_back(QueuedJob {
                key: key.into(),
                job,
            });
            self.claim_worker(&mut state)
        };

        if start_worker {
            self.spawn_worker();
        }
        Ok(())
    }

    /// Start processing jobs held by a queue created paused
    pub fn set_running(&self) {
        let start_worker = {
            let mut state = self.state.lock();
            state.running = true;
            self.claim_worker(&mut state)
        };

        if start_worker {
            self.spawn_worker();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_spent(&self) -> bool {
        self.state.lock().spent
    }

    /// Jobs waiting behind the one currently executing
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Cancel the running job, drop pending ones and wait for the worker to
    /// go idle. The queue accepts no work afterwards.
    pub async fn drain(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.spent = true;
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        self.token.cancel();
        if dropped > 0 {
            self.logger
                .debug(format_args!("Dropped {} pending jobs", dropped));
        }

        self.idle().await;
    }

    /// Resolve once no job is executing
    pub async fn idle(&self) {
        let mut busy = self.busy.subscribe();
        // Sender lives as long as self, so this only returns Ok
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    fn claim_worker(&self, state: &mut QueueState) -> bool {
        if state.running && !state.worker_active && !state.spent && !state.pending.is_empty() {
            state.worker_active = true;
            self.busy.send_replace(true);
            true
        } else {
            false
        }
    }

    fn spawn_worker(&self) {
        let queue = self.clone();
        self.runtime.spawn(async move { queue.run_worker().await });
    }

    async fn run_worker(self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.worker_active = false;
                        self.busy.send_replace(false);
                        return;
                    }
                }
            };

            let QueuedJob { key, job } = next;
            if self.token.is_cancelled() {
                continue;
            }
            match self.runtime.spawn(job(self.token.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(SurfaceError::Cancelled)) => {
                    self.logger.debug(format_args!("Job \"{}\" cancelled", key));
                }
                Ok(Err(e)) => {
                    self.logger.error(format_args!("Job \"{}\" failed: {}", key, e));
                }
                Err(e) => {
                    self.logger.error(format_args!("Job \"{}\" panicked: {}", key, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue(running: bool) -> JobQueue {
        JobQueue::new(ModuleLogger::new("test"), running, Handle::current())
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        entry: &str,
    ) -> impl FnOnce(CancellationToken) -> JobFuture + Send + 'static {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        move |_token: CancellationToken| -> JobFuture {
            Box::pin(async move {
                log.lock().push(entry);
                Ok::<(), SurfaceError>(())
            })
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_enqueue_order() {
        let q = queue(true);
        let log = Arc::new(Mutex::new(Vec::new()));

        for key in ["a", "b", "a", "c"] {
            q.enqueue(key, recorder(&log, key)).unwrap();
        }
        q.idle().await;

        assert_eq!(*log.lock(), vec!["a", "b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_paused_queue_waits_for_release() {
        let q = queue(false);
        let log = Arc::new(Mutex::new(Vec::new()));

        q.enqueue("a", recorder(&log, "a")).unwrap();
        q.enqueue("b", recorder(&log, "b")).unwrap();
        tokio::task::yield_now().await;
        assert!(log.lock().is_empty());
        assert_eq!(q.pending_len(), 2);

        q.set_running();
        q.idle().await;
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_siblings() {
        let q = queue(true);
        let log = Arc::new(Mutex::new(Vec::new()));

        q.enqueue("bad", |_token| async { Err(SurfaceError::Driver("boom".into())) })
            .unwrap();
        q.enqueue("panic", |_token| async {
            if true {
                panic!("driver bug");
            }
            Ok(())
        })
        .unwrap();
        q.enqueue("good", recorder(&log, "good")).unwrap();
        q.idle().await;

        assert_eq!(*log.lock(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_drain_cancels_running_and_drops_pending() {
        let q = queue(true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let slow_log = Arc::clone(&log);
        q.enqueue("slow", move |token: CancellationToken| async move {
            let _ = started_tx.send(());
            tokio::select! {
                _ = token.cancelled() => {
                    slow_log.lock().push("slow-cancelled".to_string());
                    Err(SurfaceError::Cancelled)
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    slow_log.lock().push("slow-finished".to_string());
                    Ok(())
                }
            }
        })
        .unwrap();
        q.enqueue("after", recorder(&log, "after")).unwrap();

        started_rx.await.unwrap();
        q.drain().await;

        assert_eq!(*log.lock(), vec!["slow-cancelled"]);
        assert!(q.is_spent());
        assert!(matches!(
            q.enqueue("late", recorder(&log, "late")),
            Err(SurfaceError::QueueSpent)
        ));
    }

    #[tokio::test]
    async fn test_drain_idle_queue_returns_immediately() {
        let q = queue(false);
        tokio::time::timeout(Duration::from_secs(1), q.drain())
            .await
            .expect("drain of an idle queue must not block");
        assert!(q.is_spent());
    }
}

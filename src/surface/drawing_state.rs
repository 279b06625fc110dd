/*
 *  surface/drawing_state.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per-surface drawing state machine - swaps job queues on every transition
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

//! Drawing state machine for one surface.
//!
//! Every transition installs a fresh, paused [`JobQueue`]. The first
//! transition issued while the machine is `Running` becomes the driver: it
//! drains the queue that was live at that moment, runs the before-next hook
//! and then starts whatever queue is current once the drain has finished.
//! Transitions issued while `Draining` only replace the state, queue and
//! hook, so any burst of transitions costs a single drain and the last one
//! wins.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::logging::ModuleLogger;
use crate::surface::error::SurfaceError;
use crate::surface::job_queue::{JobFuture, JobQueue};

/// Named drawing states of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawState {
    PreInit,
    Blank,
    Draw,
    LockedPendingDraw,
    Status,
    Reinit,
    Closed,
}

impl DrawState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawState::PreInit => "preinit",
            DrawState::Blank => "blank",
            DrawState::Draw => "draw",
            DrawState::LockedPendingDraw => "locked-pending-draw",
            DrawState::Status => "status",
            DrawState::Reinit => "reinit",
            DrawState::Closed => "closed",
        }
    }
}

impl fmt::Display for DrawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs once the old queue is drained, before the new queue starts
pub type BeforeRunHook = Box<dyn FnOnce() -> JobFuture + Send>;

/// Box an async closure as a [`BeforeRunHook`]
pub fn before_run<F, Fut>(f: F) -> BeforeRunHook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SurfaceError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Queue lifecycle; `generation` counts installed queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Current queue is processing jobs
    Running { generation: u64 },
    /// A previous queue is being drained, current queue is held
    Draining { generation: u64 },
}

struct Inner {
    state: DrawState,
    queue: JobQueue,
    phase: Phase,
    before_next: Option<BeforeRunHook>,
    generation: u64,
    drains: u64,
}

/// Cloneable handle; all clones share one machine
#[derive(Clone)]
pub struct DrawingState {
    inner: Arc<Mutex<Inner>>,
    draining: Arc<watch::Sender<bool>>,
    runtime: Handle,
    logger: ModuleLogger,
}

impl DrawingState {
    /// Drains, hooks and queue workers all run on `runtime`
    pub fn new(logger: ModuleLogger, initial: DrawState, runtime: Handle) -> Self {
        let (draining, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                queue: JobQueue::new(logger.clone(), true, runtime.clone()),
                phase: Phase::Running { generation: 0 },
                before_next: None,
                generation: 0,
                drains: 0,
            })),
            draining: Arc::new(draining),
            runtime,
            logger,
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn state(&self) -> DrawState {
        self.inner.lock().state
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Number of queue drains started so far
    pub fn drain_count(&self) -> u64 {
        self.inner.lock().drains
    }

    /// Add a job to the current queue. Jobs queued mid-transition land in
    /// the queue of the newest state and wait for the drain to finish.
    pub fn queue_job<F, Fut>(&self, key: impl Into<String>, f: F) -> Result<(), SurfaceError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SurfaceError>> + Send + 'static,
    {
        self.inner.lock().queue.enqueue(key, f)
    }

    /// Move to `new_state`, discarding all queued and running work
    pub fn transition(&self, new_state: DrawState, before_next: Option<BeforeRunHook>) {
        let drain = {
            let mut inner = self.inner.lock();
            self.begin_transition(&mut inner, new_state, before_next)
        };
        if let Some(old) = drain {
            self.spawn_drain(old);
        }
    }

    /// Like [`DrawingState::transition`], but only when the state differs.
    /// Returns whether a transition happened.
    pub fn transition_if_changed(
        &self,
        new_state: DrawState,
        before_next: Option<BeforeRunHook>,
    ) -> bool {
        let drain = {
            let mut inner = self.inner.lock();
            if inner.state == new_state {
                return false;
            }
            self.begin_transition(&mut inner, new_state, before_next)
        };
        if let Some(old) = drain {
            self.spawn_drain(old);
        }
        true
    }

    /// Resolve once no drain is in progress and the current queue is idle
    pub async fn settled(&self) {
        loop {
            let mut draining = self.draining.subscribe();
            let _ = draining.wait_for(|d| !*d).await;

            let (queue, generation) = {
                let inner = self.inner.lock();
                (inner.queue.clone(), inner.generation)
            };
            queue.idle().await;

            let inner = self.inner.lock();
            if inner.generation == generation && matches!(inner.phase, Phase::Running { .. }) {
                return;
            }
        }
    }

    fn begin_transition(
        &self,
        inner: &mut Inner,
        new_state: DrawState,
        before_next: Option<BeforeRunHook>,
    ) -> Option<JobQueue> {
        let drain = match inner.phase {
            Phase::Running { .. } => Some(inner.queue.clone()),
            Phase::Draining { .. } => None,
        };

        self.logger.debug(format_args!(
            "Aborting queue: {} -> {} (abort={})",
            inner.state,
            new_state,
            drain.is_some()
        ));

        inner.generation += 1;
        inner.state = new_state;
        inner.queue = JobQueue::new(self.logger.clone(), false, self.runtime.clone());
        inner.before_next = before_next;
        inner.phase = Phase::Draining {
            generation: inner.generation,
        };

        if drain.is_some() {
            inner.drains += 1;
            self.draining.send_replace(true);
        }
        drain
    }

    fn spawn_drain(&self, old: JobQueue) {
        let machine = self.clone();
        self.runtime
            .spawn(async move { machine.finish_transition(old).await });
    }

    async fn finish_transition(self, old: JobQueue) {
        old.drain().await;

        // a hook installed while another hook runs still goes first;
        // the last empty check and the switch to running share one lock
        let (state, generation) = loop {
            let hook = {
                let mut inner = self.inner.lock();
                match inner.before_next.take() {
                    Some(hook) => hook,
                    None => {
                        inner.phase = Phase::Running {
                            generation: inner.generation,
                        };
                        inner.queue.set_running();
                        break (inner.state, inner.generation);
                    }
                }
            };
            match self.runtime.spawn(hook()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self
                    .logger
                    .error(format_args!("Failed to run before queue: {}", e)),
                Err(e) => self
                    .logger
                    .error(format_args!("Before queue hook panicked: {}", e)),
            }
        };
        self.draining.send_replace(false);

        self.logger.debug(format_args!(
            "Aborted, running {} queue (generation {})",
            state, generation
        ));
    }
}

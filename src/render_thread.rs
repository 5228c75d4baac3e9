// src/render_thread.rs
//! Render thread + deferred command queue.
//!
//! Producers push closures from any thread with [`RenderThread::queue`]. Nothing runs until the
//! owner asks for it: [`RenderThread::wait_all`] drains the queue in order and blocks until done,
//! [`RenderThread::execute_one`] runs only the most recently queued closure and returns at once.
//!
//! One mutex guards the queue and a single [`ThreadState`]; one condition variable carries
//! every wake-up in both directions. With the thread disabled the same calls run the closures
//! synchronously on the caller.
//!
//! Shutdown discards whatever is still queued. A closure that already started always finishes.
//! A closure that panics is logged and counted; the queue keeps running and waiters still wake.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

pub const RENDER_THREAD_NAME: &str = "Render Thread";

pub type RenderCommand = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// 1. STATE
// ============================================================================

/// What the worker has been asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    /// Run the most recently queued closure, then go idle.
    ExecuteOne,
    /// Run everything, oldest first, until the queue is empty.
    ExecuteAll,
    ShuttingDown,
}

struct Inner {
    state: ThreadState,
    queue: VecDeque<RenderCommand>,
    /// A closure is running right now (lock released).
    busy: bool,
}

/// Counters for pacing and shutdown diagnostics.
#[derive(Debug, Default)]
pub struct RenderThreadMetrics {
    pub queued: AtomicUsize,
    pub executed: AtomicUsize,
    /// Commands that panicked. They count as run, not as executed.
    pub panicked: AtomicUsize,
    /// Dropped unexecuted at shutdown or queued after it.
    pub discarded: AtomicUsize,
}

struct Shared {
    inner: Mutex<Inner>,
    signal: Condvar,
    metrics: RenderThreadMetrics,
    thread_id: OnceLock<ThreadId>,
}

impl Shared {
    /// Run one command with the lock released. A panic stays inside the command.
    fn run(&self, guard: &mut MutexGuard<'_, Inner>, command: RenderCommand) {
        guard.busy = true;
        let outcome = MutexGuard::unlocked(guard, || catch_unwind(AssertUnwindSafe(command)));
        guard.busy = false;
        match outcome {
            Ok(()) => {
                self.metrics.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.metrics.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!("Render command panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

// ============================================================================
// 2. RENDER THREAD
// ============================================================================

pub struct RenderThread {
    shared: Arc<Shared>,
    enabled: bool,
    handle: Option<JoinHandle<()>>,
    last_wait: Mutex<Duration>,
}

impl RenderThread {
    /// Spawn the worker when `enabled`, otherwise run everything on the calling thread.
    pub fn new(enabled: bool) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ThreadState::Idle,
                queue: VecDeque::new(),
                busy: false,
            }),
            signal: Condvar::new(),
            metrics: RenderThreadMetrics::default(),
            thread_id: OnceLock::new(),
        });

        let handle = if enabled {
            let worker = Arc::clone(&shared);
            match std::thread::Builder::new()
                .name(RENDER_THREAD_NAME.into())
                .spawn(move || worker_loop(&worker))
            {
                Ok(handle) => {
                    let _ = shared.thread_id.set(handle.thread().id());
                    Some(handle)
                }
                Err(err) => {
                    log::error!("Failed to spawn the render thread, running synchronously: {err}");
                    None
                }
            }
        } else {
            None
        };
        if handle.is_none() {
            let _ = shared.thread_id.set(std::thread::current().id());
        }

        log::info!(
            "Render thread {}",
            if handle.is_some() { "started" } else { "disabled" }
        );
        Self {
            shared,
            enabled: handle.is_some(),
            handle,
            last_wait: Mutex::new(Duration::ZERO),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True on the thread that executes queued closures.
    pub fn is_render_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&std::thread::current().id())
    }

    pub fn state(&self) -> ThreadState {
        self.shared.inner.lock().state
    }

    pub fn pending(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn metrics(&self) -> &RenderThreadMetrics {
        &self.shared.metrics
    }

    /// How long the last [`wait_all`](Self::wait_all) blocked.
    pub fn last_wait(&self) -> Duration {
        *self.last_wait.lock()
    }

    /// Defer `command`. Never blocks on the worker.
    pub fn queue<F>(&self, command: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state == ThreadState::ShuttingDown {
            drop(inner);
            self.shared.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            log::debug!("Render command queued after shutdown, dropping it");
            return;
        }
        inner.queue.push_back(Box::new(command));
        self.shared.metrics.queued.fetch_add(1, Ordering::Relaxed);
        // A pending ExecuteOne may be waiting for something to run.
        if inner.state != ThreadState::Idle {
            self.shared.signal.notify_all();
        }
    }

    /// Run every queued closure in order and block until the queue is drained.
    ///
    /// A pending [`execute_one`](Self::execute_one) keeps precedence: the newest closure runs
    /// first, then the rest drain oldest first.
    pub fn wait_all(&self) {
        let start = Instant::now();
        let mut inner = self.shared.inner.lock();

        if !self.enabled {
            while let Some(command) = inner.queue.pop_front() {
                self.shared.run(&mut inner, command);
            }
        } else {
            loop {
                let drained =
                    inner.queue.is_empty() && !inner.busy && inner.state != ThreadState::ExecuteAll;
                if inner.state == ThreadState::ShuttingDown || drained {
                    break;
                }
                if inner.state == ThreadState::Idle && !inner.queue.is_empty() {
                    inner.state = ThreadState::ExecuteAll;
                    self.shared.signal.notify_all();
                }
                self.shared.signal.wait(&mut inner);
            }
        }
        drop(inner);
        *self.last_wait.lock() = start.elapsed();
    }

    /// Run only the most recently queued closure. Does not wait for it.
    pub fn execute_one(&self) {
        let mut inner = self.shared.inner.lock();
        if !self.enabled {
            if let Some(command) = inner.queue.pop_back() {
                self.shared.run(&mut inner, command);
            }
            return;
        }
        if inner.state == ThreadState::Idle {
            inner.state = ThreadState::ExecuteOne;
            self.shared.signal.notify_all();
        }
    }

    /// Block until no request is in flight. A pending `execute_one` on an empty queue counts as idle.
    pub fn wait_idle(&self) {
        let mut inner = self.shared.inner.lock();
        while inner.state != ThreadState::ShuttingDown
            && (inner.busy
                || inner.state == ThreadState::ExecuteAll
                || (inner.state == ThreadState::ExecuteOne && !inner.queue.is_empty()))
        {
            self.shared.signal.wait(&mut inner);
        }
    }

    /// Ask the worker to stop. Pending closures are discarded, a running one finishes.
    pub fn request_join(&self) {
        let dropped = {
            let mut inner = self.shared.inner.lock();
            inner.state = ThreadState::ShuttingDown;
            self.shared.signal.notify_all();
            std::mem::take(&mut inner.queue)
        };
        if !dropped.is_empty() {
            self.shared
                .metrics
                .discarded
                .fetch_add(dropped.len(), Ordering::Relaxed);
            log::debug!("Render thread shutting down with {} commands pending", dropped.len());
        }
    }

    /// [`request_join`](Self::request_join) and wait for the worker to exit.
    pub fn join(&mut self) {
        self.request_join();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(shared: &Shared) {
    #[cfg(feature = "high_priority")]
    {
        if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_ok() {
            log::info!("Elevated render thread priority to Max.");
        }
    }

    let mut inner = shared.inner.lock();
    loop {
        while !(inner.state == ThreadState::ShuttingDown
            || (inner.state != ThreadState::Idle && !inner.queue.is_empty()))
        {
            shared.signal.wait(&mut inner);
        }

        match inner.state {
            ThreadState::ShuttingDown => break,
            ThreadState::ExecuteOne => {
                if let Some(command) = inner.queue.pop_back() {
                    shared.run(&mut inner, command);
                }
                if inner.state == ThreadState::ExecuteOne {
                    inner.state = ThreadState::Idle;
                }
            }
            ThreadState::ExecuteAll => {
                while inner.state == ThreadState::ExecuteAll {
                    let Some(command) = inner.queue.pop_front() else {
                        break;
                    };
                    shared.run(&mut inner, command);
                }
                if inner.state == ThreadState::ExecuteAll {
                    inner.state = ThreadState::Idle;
                }
            }
            ThreadState::Idle => {}
        }
        shared.signal.notify_all();
    }
    log::debug!("Render thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> RenderCommand) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |id: u32| -> RenderCommand {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(id))
        };
        (log, make)
    }

    #[test]
    fn wait_all_runs_in_queue_order() {
        for enabled in [true, false] {
            let thread = RenderThread::new(enabled);
            let (log, make) = recorder();
            for id in 1..=3 {
                thread.queue(make(id));
            }
            thread.wait_all();
            assert_eq!(*log.lock(), vec![1, 2, 3]);
            assert_eq!(thread.pending(), 0);
            assert_eq!(thread.metrics().executed.load(Ordering::Relaxed), 3);
        }
    }

    #[test]
    fn execute_one_runs_the_newest_command() {
        for enabled in [true, false] {
            let thread = RenderThread::new(enabled);
            let (log, make) = recorder();
            thread.queue(make(1));
            thread.queue(make(2));
            thread.execute_one();
            thread.wait_idle();
            assert_eq!(*log.lock(), vec![2]);
            assert_eq!(thread.pending(), 1);
            thread.wait_all();
            assert_eq!(*log.lock(), vec![2, 1]);
        }
    }

    #[test]
    fn commands_queued_while_draining_are_drained_too() {
        let thread = Arc::new(RenderThread::new(true));
        let (log, make) = recorder();
        let follow_up = make(2);
        let inner = Arc::clone(&thread);
        let sink = Arc::clone(&log);
        thread.queue(move || {
            sink.lock().push(1);
            inner.queue(follow_up);
        });
        thread.wait_all();
        assert_eq!(*log.lock(), vec![1, 2]);
        // The closure held the last extra reference; drop it so the worker can be joined.
        assert_eq!(Arc::strong_count(&thread), 1);
    }

    #[test]
    fn join_discards_pending_work() {
        let mut thread = RenderThread::new(true);
        let (log, make) = recorder();
        thread.queue(make(1));
        thread.queue(make(2));
        thread.join();

        assert!(log.lock().is_empty());
        assert_eq!(thread.state(), ThreadState::ShuttingDown);
        assert_eq!(thread.metrics().discarded.load(Ordering::Relaxed), 2);

        thread.queue(make(3));
        thread.wait_all();
        assert!(log.lock().is_empty());
        assert_eq!(thread.metrics().executed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn no_command_runs_twice() {
        let thread = RenderThread::new(true);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&count);
            thread.queue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            if count.load(Ordering::SeqCst) % 3 == 0 {
                thread.execute_one();
            }
        }
        thread.wait_all();
        thread.wait_all();
        assert_eq!(count.load(Ordering::SeqCst), 64);
        assert_eq!(thread.metrics().executed.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn pending_execute_one_runs_before_the_drain() {
        let thread = RenderThread::new(true);
        let (log, make) = recorder();
        for id in 1..=3 {
            thread.queue(make(id));
        }
        thread.execute_one();
        thread.wait_all();
        assert_eq!(*log.lock(), vec![3, 1, 2]);
        assert_eq!(thread.pending(), 0);
        assert_eq!(thread.state(), ThreadState::Idle);
    }

    #[test]
    fn panicking_command_does_not_stall_waiters() {
        for enabled in [true, false] {
            let (log, make) = recorder();
            let (tx, rx) = crossbeam::channel::bounded(1);
            std::thread::spawn(move || {
                let thread = RenderThread::new(enabled);
                thread.queue(|| panic!("command failed"));
                thread.queue(make(7));
                thread.wait_all();
                thread.queue(|| panic!("command failed again"));
                thread.execute_one();
                thread.wait_idle();
                let counts = (
                    thread.metrics().panicked.load(Ordering::Relaxed),
                    thread.metrics().executed.load(Ordering::Relaxed),
                );
                drop(thread);
                let _ = tx.send(counts);
            });
            let counts = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("waiters returned after a panicking command");
            assert_eq!(counts, (2, 1));
            assert_eq!(*log.lock(), vec![7]);
        }
    }

    #[test]
    fn render_thread_identity() {
        let thread = RenderThread::new(true);
        assert!(!thread.is_render_thread());
        let (tx, rx) = crossbeam::channel::bounded(1);
        let shared = Arc::clone(&thread.shared);
        thread.queue(move || {
            let on_worker = shared.thread_id.get() == Some(&std::thread::current().id());
            let _ = tx.send((on_worker, std::thread::current().name().map(str::to_owned)));
        });
        thread.wait_all();
        let (on_worker, name) = rx.recv().unwrap();
        assert!(on_worker);
        assert_eq!(name.as_deref(), Some(RENDER_THREAD_NAME));

        let inline = RenderThread::new(false);
        assert!(inline.is_render_thread());
    }
}

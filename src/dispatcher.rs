//! Bounded worker pool for frame handling.
//!
//! A dispatcher owns an input queue and a single dispatch task. The task
//! takes frames off the queue in order and spawns one handler invocation per
//! frame. Each invocation first acquires a permit from a fixed-size
//! semaphore, so at most `concurrency` handlers run at once. The dispatch
//! task itself never waits for a permit.
//!
//! Shutdown is a drain, not a cancel: `stop` closes the queue, frames already
//! accepted are still dispatched, and the state only returns to `Idle` once
//! every spawned invocation has finished. A handler that never finishes
//! therefore stalls the drain.
//!
//! # Example
//!
//! ```
//! use chunkwire::dispatcher::Dispatcher;
//! use chunkwire::handler::handler_fn;
//! use chunkwire::protocol::Frame;
//!
//! # #[tokio::main] async fn main() -> chunkwire::Result<()> {
//! let dispatcher = Dispatcher::new("workers", 3, handler_fn(|frame| async move {
//!     println!("{}", frame);
//!     Ok(())
//! }));
//!
//! dispatcher.start()?;
//! dispatcher.submit(Frame::new(1, 1, 1, b"job")?)?;
//! dispatcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::task::TaskTracker;

use crate::error::{ChunkwireError, Result};
use crate::handler::{BoxFuture, FrameHandler, HandlerResult};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::Frame;

/// Runs a [`FrameHandler`] with a concurrency ceiling.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    name: String,
    concurrency: usize,
    handler: Arc<dyn FrameHandler>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    lifecycle: Lifecycle,
    queue: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl Dispatcher {
    /// Create an idle dispatcher. A `concurrency` of zero is raised to one.
    pub fn new(name: impl Into<String>, concurrency: usize, handler: impl FrameHandler) -> Self {
        let concurrency = concurrency.max(1);
        let tracker = TaskTracker::new();
        tracker.close();
        Self {
            inner: Arc::new(DispatcherInner {
                name: name.into(),
                concurrency,
                handler: Arc::new(handler),
                permits: Arc::new(Semaphore::new(concurrency)),
                tracker,
                lifecycle: Lifecycle::new(),
                queue: Mutex::new(None),
            }),
        }
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Concurrency ceiling.
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.current()
    }

    /// Handler invocations spawned and not yet finished, including those
    /// still waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Handler invocations currently holding a permit.
    pub fn active(&self) -> usize {
        self.inner.concurrency - self.inner.permits.available_permits()
    }

    /// Move `Idle -> Starting -> Running` and spawn the dispatch task.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.transition(LifecycleState::Starting)?;

        let (tx, rx) = mpsc::unbounded_channel();
        *inner.queue.lock() = Some(tx);
        inner.tracker.reopen();

        inner.lifecycle.transition(LifecycleState::Running)?;
        tokio::spawn(dispatch_loop(inner.clone(), rx));
        tracing::debug!(dispatcher = %inner.name, concurrency = inner.concurrency, "dispatcher started");
        Ok(())
    }

    /// Queue a frame for handling.
    ///
    /// # Errors
    ///
    /// [`ChunkwireError::NotRunning`] unless the dispatcher is running.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(ChunkwireError::NotRunning(state));
        }
        match self.inner.queue.lock().as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| ChunkwireError::NotRunning(self.state())),
            None => Err(ChunkwireError::NotRunning(self.state())),
        }
    }

    /// Move `Running -> Stopping` and close the input queue.
    ///
    /// The dispatch task finishes the queue, waits for every invocation,
    /// then moves to `Idle`.
    pub fn stop(&self) -> Result<()> {
        self.inner.lifecycle.transition(LifecycleState::Stopping)?;
        self.inner.queue.lock().take();
        tracing::debug!(dispatcher = %self.inner.name, "dispatcher stopping");
        Ok(())
    }

    /// Wait until the dispatcher is idle.
    pub async fn wait_for_complete(&self) {
        self.inner.lifecycle.wait_for(LifecycleState::Idle).await
    }

    /// Stop and wait for the drain to finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop()?;
        self.wait_for_complete().await;
        Ok(())
    }
}

impl FrameHandler for Dispatcher {
    fn call(&self, frame: Frame) -> BoxFuture<'static, HandlerResult> {
        let submitted = self.submit(frame);
        Box::pin(async move { submitted })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

async fn dispatch_loop(inner: Arc<DispatcherInner>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let permits = inner.permits.clone();
        let handler = inner.handler.clone();
        let name = inner.name.clone();

        inner.tracker.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let (main, sub) = (frame.main_command_id(), frame.sub_command_id());
            if let Err(e) = handler.call(frame).await {
                tracing::error!(dispatcher = %name, main, sub, error = %e, "handler failed");
            }
        });
    }

    // Queue closed by stop(); drain what is in flight.
    inner.tracker.close();
    inner.tracker.wait().await;

    if let Err(e) = inner.lifecycle.transition(LifecycleState::Idle) {
        tracing::error!(dispatcher = %inner.name, error = %e, "drain finished out of order");
    }
    tracing::debug!(dispatcher = %inner.name, "dispatcher idle");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    fn gauged(gauge: Arc<Gauge>, hold: Duration) -> impl FrameHandler {
        handler_fn(move |_frame| {
            let gauge = gauge.clone();
            async move {
                let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                gauge.current.fetch_sub(1, Ordering::SeqCst);
                gauge.done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn frame(main: u16) -> Frame {
        Frame::new(main, 0, 1, b"work").unwrap()
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::new("bounded", 3, gauged(gauge.clone(), Duration::from_millis(10)));
        dispatcher.start().unwrap();

        for main in 0..20 {
            dispatcher.submit(frame(main)).unwrap();
        }
        dispatcher.shutdown().await.unwrap();

        assert_eq!(gauge.done.load(Ordering::SeqCst), 20);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.active(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejected_unless_running() {
        let dispatcher = Dispatcher::new("idle", 1, handler_fn(|_| async { Ok(()) }));
        assert!(matches!(
            dispatcher.submit(frame(1)),
            Err(ChunkwireError::NotRunning(LifecycleState::Idle))
        ));

        dispatcher.start().unwrap();
        dispatcher.stop().unwrap();
        assert!(matches!(dispatcher.submit(frame(1)), Err(ChunkwireError::NotRunning(_))));
        dispatcher.wait_for_complete().await;
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_work() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::new("drain", 2, gauged(gauge.clone(), Duration::from_millis(30)));
        dispatcher.start().unwrap();

        for main in 0..6 {
            dispatcher.submit(frame(main)).unwrap();
        }
        dispatcher.stop().unwrap();
        assert_eq!(dispatcher.state(), LifecycleState::Stopping);

        dispatcher.wait_for_complete().await;
        assert_eq!(dispatcher.state(), LifecycleState::Idle);
        assert_eq!(gauge.done.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_are_rejected() {
        let dispatcher = Dispatcher::new("order", 1, handler_fn(|_| async { Ok(()) }));
        assert!(matches!(
            dispatcher.stop(),
            Err(ChunkwireError::InvalidTransition { .. })
        ));
        assert_eq!(dispatcher.state(), LifecycleState::Idle);

        dispatcher.start().unwrap();
        assert!(matches!(
            dispatcher.start(),
            Err(ChunkwireError::InvalidTransition { .. })
        ));
        assert_eq!(dispatcher.state(), LifecycleState::Running);
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_drain() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::new("again", 2, gauged(gauge.clone(), Duration::from_millis(1)));

        for round in 1..=3 {
            dispatcher.start().unwrap();
            dispatcher.submit(frame(round)).unwrap();
            dispatcher.shutdown().await.unwrap();
            assert_eq!(gauge.done.load(Ordering::SeqCst), round as usize);
        }
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_dispatch() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let dispatcher = Dispatcher::new(
            "errors",
            2,
            handler_fn(move |frame: Frame| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if frame.main_command_id() % 2 == 0 {
                        return Err(ChunkwireError::Handler("even".into()));
                    }
                    Ok(())
                }
            }),
        );
        dispatcher.start().unwrap();
        for main in 0..10 {
            dispatcher.submit(frame(main)).unwrap();
        }
        dispatcher.shutdown().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_dispatcher_as_frame_handler() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::new("handler", 1, gauged(gauge.clone(), Duration::ZERO));
        let as_handler: Arc<dyn FrameHandler> = Arc::new(dispatcher.clone());

        assert!(as_handler.call(frame(1)).await.is_err());
        dispatcher.start().unwrap();
        as_handler.call(frame(1)).await.unwrap();
        dispatcher.shutdown().await.unwrap();
        assert_eq!(gauge.done.load(Ordering::SeqCst), 1);
    }
}

//! Background scheduler ownership for the event-to-blocking direction.
//!
//! # Responsibilities
//! - Lazily start a dedicated thread hosting a cooperative scheduler
//! - Hand out the scheduler handle to request drivers
//! - Shut the thread down when the owning adapter is released
//!
//! # Design Decisions
//! - The loop thread parks inside `Runtime::block_on`, which keeps the
//!   timer and IO drivers running while foreign threads enter the runtime
//!   through `Handle::block_on`.
//! - A caller-supplied handle is never started or stopped here.

use once_cell::sync::OnceCell;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::BridgeError;

/// Owns (or borrows) the cooperative scheduler used to run event-driven
/// application tasks.
pub struct EventLoop {
    inner: Inner,
}

enum Inner {
    /// A dedicated loop thread, started on first use.
    Owned(OnceCell<LoopThread>),
    /// A scheduler the caller owns; its lifecycle is not ours.
    External(Handle),
}

impl EventLoop {
    /// An event loop that will start its own scheduler thread on first use.
    pub fn owned() -> Self {
        Self {
            inner: Inner::Owned(OnceCell::new()),
        }
    }

    /// Borrow a caller-supplied scheduler.
    pub fn external(handle: Handle) -> Self {
        Self {
            inner: Inner::External(handle),
        }
    }

    /// The scheduler handle, starting the background thread if this loop is
    /// owned and has not run yet.
    pub fn handle(&self) -> Result<Handle, BridgeError> {
        match &self.inner {
            Inner::External(handle) => Ok(handle.clone()),
            Inner::Owned(cell) => cell
                .get_or_try_init(LoopThread::spawn)
                .map(|thread| thread.handle.clone()),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::owned()
    }
}

struct LoopThread {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl LoopThread {
    fn spawn() -> Result<Self, BridgeError> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("bridge-event-loop".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = handle_tx.send(Err(error));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|e| BridgeError::scheduler(format!("failed to spawn loop thread: {e}")))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| BridgeError::scheduler("loop thread exited before reporting a handle"))?
            .map_err(|e| BridgeError::scheduler(format!("failed to build runtime: {e}")))?;

        tracing::debug!(thread = "bridge-event-loop", "background scheduler started");

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!(thread = "bridge-event-loop", "background scheduler stopped");
    }
}

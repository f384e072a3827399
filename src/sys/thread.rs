//! Named thread wrapper with error capture and a drop guard.
//!
//! [`Thread`] wraps the OS thread primitive to add:
//!
//! - two-phase startup: the body is supplied at construction and runs only
//!   after [`start`](Thread::start), mirroring RTOS create-then-start;
//! - configurable stack size via [`ThreadOptions`] (the host backend
//!   self-allocates; `priority` is carried as advisory metadata);
//! - capture of any error or panic raised inside the body into a
//!   retrievable message, so one thread's failure never tears down another;
//! - cooperative abort through the [`ThreadSignal`] handed to the body;
//! - a drop precondition: dropping a still-running thread is a programming
//!   error reported as [`PeriphError::DestroyingRunningThread`], because the
//!   running body may reference state owned by the wrapper being dropped.

use crate::error::{PeriphError, Result};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Thread creation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadOptions {
    /// Stack size in bytes; the platform default when `None`.
    pub stack_size: Option<usize>,
    /// Scheduling priority. Advisory on the host backend.
    pub priority: u8,
}

#[derive(Debug, Default)]
struct ThreadShared {
    finished: AtomicBool,
    abort: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Cooperative abort flag shared with a running thread body.
///
/// The body decides where it is safe to stop and polls
/// [`is_aborted`](ThreadSignal::is_aborted) at those points; there is no
/// preemptive kill.
#[derive(Clone)]
pub struct ThreadSignal(Arc<ThreadShared>);

impl ThreadSignal {
    /// Whether [`Thread::abort`] has been requested.
    pub fn is_aborted(&self) -> bool {
        self.0.abort.load(Ordering::Acquire)
    }
}

type ThreadBody = Box<dyn FnOnce(ThreadSignal) -> Result<()> + Send + 'static>;

/// A named concurrent execution context with error capture.
pub struct Thread {
    name: String,
    options: ThreadOptions,
    body: Option<ThreadBody>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<ThreadShared>,
}

impl Thread {
    /// Create a thread that will run `body` once started.
    pub fn new<F>(name: impl Into<String>, options: ThreadOptions, body: F) -> Self
    where
        F: FnOnce(ThreadSignal) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            options,
            body: Some(Box::new(body)),
            handle: None,
            shared: Arc::new(ThreadShared::default()),
        }
    }

    /// Start executing the body on its own thread.
    ///
    /// Fails with [`PeriphError::NoMemory`] if the OS cannot allocate the
    /// thread or its stack, and [`PeriphError::Unknown`] for other spawn
    /// failures or if the thread was already started.
    pub fn start(&mut self) -> Result<()> {
        let body = self.body.take().ok_or_else(|| {
            PeriphError::Unknown(format!("thread '{}' already started", self.name))
        })?;

        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();

        let mut builder = std::thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.options.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder
            .spawn(move || {
                let signal = ThreadSignal(Arc::clone(&shared));
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(signal)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(thread = %name, %err, "thread body failed");
                        *shared.error.lock() = Some(err.to_string());
                    }
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        error!(thread = %name, %msg, "thread body panicked");
                        *shared.error.lock() = Some(msg);
                    }
                }
                shared.finished.store(true, Ordering::Release);
            })
            .map_err(|err| match err.kind() {
                ErrorKind::OutOfMemory => {
                    PeriphError::NoMemory(format!("spawning thread '{}': {err}", self.name))
                }
                _ => PeriphError::Unknown(format!("spawning thread '{}': {err}", self.name)),
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Block until the body has returned.
    ///
    /// Any error the body raised is available via [`error`](Thread::error)
    /// afterwards; `join` itself only fails if the thread was never started.
    pub fn join(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or_else(|| {
            PeriphError::Unknown(format!("thread '{}' is not running", self.name))
        })?;
        // Body panics are caught at the entry boundary, so this join can
        // only fail on unwind paths outside the body. Record them the same
        // way rather than propagating a panic payload.
        if handle.join().is_err() {
            let mut slot = self.shared.error.lock();
            if slot.is_none() {
                *slot = Some("thread terminated abnormally".to_string());
            }
        }
        Ok(())
    }

    /// Request cooperative termination of the body.
    ///
    /// The body observes the request through its [`ThreadSignal`]; a body
    /// that never polls the signal will not stop.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::Release);
    }

    /// Whether the body has finished (or was never started).
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(_) => self.shared.finished.load(Ordering::Acquire),
            // Never started, or already joined: nothing is running.
            None => true,
        }
    }

    /// The error message captured from the body, if it failed.
    pub fn error(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured stack size, if one was requested.
    pub fn stack_size(&self) -> Option<usize> {
        self.options.stack_size
    }

    /// Advisory priority.
    pub fn priority(&self) -> u8 {
        self.options.priority
    }
}

impl Drop for Thread {
    #[allow(clippy::panic)]
    fn drop(&mut self) {
        if self.handle.is_some() && !self.shared.finished.load(Ordering::Acquire) {
            let err = PeriphError::DestroyingRunningThread(self.name.clone());
            if std::thread::panicking() {
                // Already unwinding: a second panic would abort the process.
                error!(thread = %self.name, "{err}");
            } else {
                panic!("{err}");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unidentified panic".to_string()
    }
}

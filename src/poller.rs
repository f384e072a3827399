//! Shared output poller: one background thread advancing every registered
//! output waveform.
//!
//! Outputs register on construction and deregister on drop; the registry
//! holds `Weak` references, so a destroyed output can never be called back
//! into even if a tick is already in flight. Each tick snapshots the
//! registry, then advances every live output with a bounded-wait lock
//! acquisition; a busy output is skipped and retried next tick rather than
//! stalling waveform progress for everyone else. This trades at most one
//! tick of timing accuracy on a contended output for availability of the
//! whole loop, and also avoids priority inversion against the output's
//! owning thread.

use crate::error::Result;
use crate::periph::digital_output::OutputShared;
use crate::periph::GPIO_WAIT;
use crate::sys::{self, Thread, ThreadOptions, ThreadSignal};
use crate::topology::DeviceId;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Poller timing configuration.
///
/// Deserializable from config files with humantime durations:
///
/// ```toml
/// tick = "4ms"
/// lock_timeout = "100us"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Interval between waveform advances.
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
    /// Bounded wait for a single output's state lock before skipping it
    /// for this tick.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick: GPIO_WAIT,
            lock_timeout: Duration::from_micros(100),
        }
    }
}

/// Registry mapping each registered output to its shared waveform state.
pub(crate) struct PollerRegistry {
    outputs: Mutex<HashMap<DeviceId, Weak<OutputShared>>>,
    lock_timeout: Duration,
}

impl PollerRegistry {
    pub(crate) fn register(&self, id: DeviceId, shared: Weak<OutputShared>) {
        self.outputs.lock().insert(id, shared);
    }

    pub(crate) fn unregister(&self, id: DeviceId) {
        self.outputs.lock().remove(&id);
    }

    fn tick(&self) {
        // Snapshot under the registry lock, advance outside it: a slow
        // output must not block registration or removal.
        let entries: Vec<(DeviceId, Weak<OutputShared>)> = self
            .outputs
            .lock()
            .iter()
            .map(|(id, weak)| (*id, weak.clone()))
            .collect();

        let now = sys::uptime();
        for (id, weak) in entries {
            match weak.upgrade() {
                Some(shared) => shared.advance(now, self.lock_timeout),
                None => {
                    trace!(device = %id, "pruning dead poller entry");
                    self.outputs.lock().remove(&id);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.outputs.lock().len()
    }
}

/// The single background poller advancing all active output waveforms.
///
/// Spawn one per process (or per test rig) and pass it to
/// [`DigitalOutput`](crate::DigitalOutput) constructors. Dropping the poller
/// signals its thread and joins it.
pub struct OutputPoller {
    registry: Arc<PollerRegistry>,
    tick: Duration,
    thread: Option<Thread>,
}

impl OutputPoller {
    /// Start the poller thread.
    pub fn spawn(config: PollerConfig) -> Result<Self> {
        let registry = Arc::new(PollerRegistry {
            outputs: Mutex::new(HashMap::new()),
            lock_timeout: config.lock_timeout,
        });

        let loop_registry = Arc::clone(&registry);
        let tick = config.tick;
        let mut thread = Thread::new(
            "gpio-poller",
            ThreadOptions {
                stack_size: None,
                priority: 1,
            },
            move |signal| {
                debug!(tick = ?tick, "output poller running");
                while !signal.is_aborted() {
                    loop_registry.tick();
                    sleep_interruptible(tick, &signal);
                }
                Ok(())
            },
        );
        thread.start()?;

        Ok(Self {
            registry,
            tick: config.tick,
            thread: Some(thread),
        })
    }

    /// Number of currently-registered outputs.
    pub fn output_count(&self) -> usize {
        self.registry.len()
    }

    /// Configured tick interval.
    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    pub(crate) fn registry(&self) -> &Arc<PollerRegistry> {
        &self.registry
    }
}

impl Drop for OutputPoller {
    fn drop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.abort();
            let _ = thread.join();
        }
    }
}

/// Sleep up to `duration`, waking early if an abort is requested. Keeps
/// poller shutdown latency bounded even with long tick intervals.
fn sleep_interruptible(duration: Duration, signal: &ThreadSignal) {
    let deadline = sys::uptime() + duration;
    loop {
        if signal.is_aborted() {
            return;
        }
        let left = deadline.saturating_sub(sys::uptime());
        if left.is_zero() {
            return;
        }
        sys::sleep(left.min(GPIO_WAIT));
    }
}

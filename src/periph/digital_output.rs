//! Digital output driver with an optional pulse-waveform state machine.
//!
//! An output has a *desired static level* and, optionally, an active pulse:
//! a waveform alternating Low for `t_low` and High for `t_high`, either
//! continuous or for a finite number of cycles. The waveform itself is
//! advanced by the shared [`OutputPoller`](crate::OutputPoller), which calls
//! [`OutputShared::advance`] once per tick.
//!
//! `OutputState` is the one piece of state in the crate with two writers:
//! the owning thread (`set_level`, `pulse_start`, `pulse_stop`) and the
//! poller (`advance`). The poller acquires the state lock with a short
//! bounded wait and skips the tick on contention, so a busy owner costs at
//! most one tick of waveform timing and never stalls other outputs.

use crate::arbiter::{Arbiter, OwnershipToken};
use crate::error::Result;
use crate::hal::{GpioBank, Level, OutputType, PinMode};
use crate::periph::GPIO_WAIT;
use crate::poller::OutputPoller;
use crate::sys;
use crate::topology::DeviceId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

struct Pulse {
    t_low: Duration,
    t_high: Duration,
    /// Level the waveform is currently holding.
    level: Level,
    first_level: Level,
    /// Cycles left for finite pulses; `None` means continuous.
    remaining: Option<usize>,
    /// Uptime of the last level switch.
    since: Duration,
}

pub(crate) struct OutputState {
    desired: Level,
    pulse: Option<Pulse>,
}

/// State shared between a [`DigitalOutput`] and the poller.
///
/// The poller holds only a `Weak` to this, so a dropped driver can never be
/// called back into.
pub(crate) struct OutputShared {
    bank: Arc<dyn GpioBank>,
    pin: u8,
    pub(crate) state: Mutex<OutputState>,
}

impl OutputShared {
    /// Advance the waveform to `now`. Poller-only.
    ///
    /// Must never raise: hardware write failures are logged and dropped,
    /// because the poller has no caller to report to. If the state lock is
    /// not acquired within `lock_timeout` the tick is skipped; the waveform
    /// loses at most one tick of timing accuracy and is retried next tick.
    pub(crate) fn advance(&self, now: Duration, lock_timeout: Duration) {
        let Some(mut state) = self.state.try_lock_for(lock_timeout) else {
            trace!(pin = self.pin, "output busy, skipping tick");
            return;
        };
        let desired = state.desired;
        let Some(pulse) = state.pulse.as_mut() else {
            return;
        };

        let half = match pulse.level {
            Level::Low => pulse.t_low,
            Level::High => pulse.t_high,
        };
        if now.saturating_sub(pulse.since) < half {
            return;
        }

        // A cycle completes when the level returns to `first_level` after
        // having left it; finite pulses count down at that moment.
        let finished = match pulse.remaining.as_mut() {
            Some(remaining) if pulse.level != pulse.first_level => {
                *remaining -= 1;
                *remaining == 0
            }
            _ => false,
        };

        if finished {
            state.pulse = None;
            self.write_logged(desired);
        } else {
            pulse.since = now;
            pulse.level = !pulse.level;
            let level = pulse.level;
            self.write_logged(level);
        }
    }

    fn write_logged(&self, level: Level) {
        if let Err(err) = self.bank.write(self.pin, level) {
            warn!(pin = self.pin, %level, %err, "output write failed");
        }
    }
}

/// Exclusively-owned digital output line.
pub struct DigitalOutput {
    id: DeviceId,
    label: String,
    shared: Arc<OutputShared>,
    poller: OutputPollerHandle,
    _token: OwnershipToken,
}

// Registration handle kept so Drop can deregister without holding the whole
// poller. Thin alias over the poller's shared registry.
type OutputPollerHandle = Arc<crate::poller::PollerRegistry>;

impl DigitalOutput {
    /// Open the output line at device `index`, drive it to `level`, and
    /// register it with `poller`.
    pub fn new(
        arbiter: &Arbiter,
        bank: Arc<dyn GpioBank>,
        poller: &OutputPoller,
        index: u8,
        output_type: OutputType,
        level: Level,
    ) -> Result<Self> {
        let line = arbiter.topology().gpio_by_index(index)?.clone();
        let token = arbiter.borrow(DeviceId::gpio(index))?;
        bank.configure(line.pin, PinMode::Output(output_type))?;
        bank.write(line.pin, level)?;

        let shared = Arc::new(OutputShared {
            bank,
            pin: line.pin,
            state: Mutex::new(OutputState {
                desired: level,
                pulse: None,
            }),
        });
        let registry = Arc::clone(poller.registry());
        registry.register(token.id(), Arc::downgrade(&shared));
        debug!(device = %token.id(), label = %line.label, pin = line.pin, "output opened");

        Ok(Self {
            id: token.id(),
            label: line.label,
            shared,
            poller: registry,
            _token: token,
        })
    }

    /// Open the output line with the given topology label.
    pub fn by_label(
        arbiter: &Arbiter,
        bank: Arc<dyn GpioBank>,
        poller: &OutputPoller,
        label: &str,
        output_type: OutputType,
        level: Level,
    ) -> Result<Self> {
        let index = arbiter.topology().gpio_index_by_label(label)?;
        Self::new(arbiter, bank, poller, index, output_type, level)
    }

    /// Set the desired static level.
    ///
    /// With no active pulse the line is driven immediately. During a pulse
    /// only the resting level changes; it applies once the pulse ends, and
    /// the pulse itself keeps running.
    pub fn set_level(&self, level: Level) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.desired = level;
        if state.pulse.is_none() {
            self.shared.bank.write(self.shared.pin, level)?;
        }
        Ok(())
    }

    /// Begin a waveform alternating Low for `t_low` and High for `t_high`,
    /// starting at `first_level` now.
    ///
    /// `count` is the number of full cycles for a finite pulse (`None` runs
    /// until stopped); `Some(0)` is a no-op. Calling this while a pulse is
    /// active replaces it atomically. A zero `t_low`/`t_high` degenerates to
    /// the line being held at the other level after the first flip; this is
    /// accepted, not special-cased.
    pub fn pulse_start(
        &self,
        t_low: Duration,
        t_high: Duration,
        count: Option<usize>,
        first_level: Level,
    ) -> Result<()> {
        if count == Some(0) {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        state.pulse = Some(Pulse {
            t_low,
            t_high,
            level: first_level,
            first_level,
            remaining: count,
            since: sys::uptime(),
        });
        self.shared.bank.write(self.shared.pin, first_level)?;
        Ok(())
    }

    /// Cancel any active pulse and force the desired static level.
    /// A no-op when no pulse is active.
    pub fn pulse_stop(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.pulse.take().is_some() {
            self.shared.bank.write(self.shared.pin, state.desired)?;
        }
        Ok(())
    }

    /// Whether a pulse is currently running.
    pub fn is_pulse_run(&self) -> bool {
        self.shared.state.lock().pulse.is_some()
    }

    /// Block until the active pulse (if any) completes naturally.
    pub fn wait_pulse_end(&self) {
        while self.is_pulse_run() {
            sys::sleep(GPIO_WAIT);
        }
    }

    /// Device identity of this output.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Topology label of this output.
    pub fn label(&self) -> &str {
        &self.label
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<OutputShared> {
        &self.shared
    }
}

impl fmt::Debug for DigitalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOutput")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pin", &self.shared.pin)
            .finish_non_exhaustive()
    }
}

impl Drop for DigitalOutput {
    fn drop(&mut self) {
        // Deregister first: after this the poller can no longer reach the
        // shared state, and the Weak upgrade guard covers ticks in flight.
        self.poller.unregister(self.id);
        if let Err(err) = self
            .shared
            .bank
            .configure(self.shared.pin, PinMode::Disconnected)
        {
            warn!(device = %self.id, %err, "failed to disconnect output pin");
        }
        debug!(device = %self.id, label = %self.label, "output closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimBank;
    use crate::poller::PollerConfig;
    use crate::topology::{GpioLine, PortMask, Topology};

    const PIN: u8 = 13;

    struct Rig {
        arbiter: Arbiter,
        bank: Arc<SimBank>,
        poller: OutputPoller,
    }

    /// Stack with an effectively idle poller so tests can drive `advance`
    /// deterministically with synthetic timestamps.
    fn rig() -> Rig {
        let topology = Topology::new(vec![GpioLine {
            index: 0,
            label: "led".into(),
            pin: PIN,
            ports: PortMask::single(0),
        }]);
        let poller = OutputPoller::spawn(PollerConfig {
            tick: Duration::from_secs(3600),
            lock_timeout: Duration::from_micros(100),
        })
        .unwrap();
        Rig {
            arbiter: Arbiter::new(topology),
            bank: Arc::new(SimBank::new()),
            poller,
        }
    }

    fn open(rig: &Rig, initial: Level) -> DigitalOutput {
        DigitalOutput::new(
            &rig.arbiter,
            rig.bank.clone(),
            &rig.poller,
            0,
            OutputType::PushPull,
            initial,
        )
        .unwrap()
    }

    const T: Duration = Duration::from_micros(100);

    #[test]
    fn finite_pulse_runs_exact_cycles_then_restores_desired() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(
            Duration::from_millis(100),
            Duration::from_millis(50),
            Some(3),
            Level::Low,
        )
        .unwrap();
        assert!(out.is_pulse_run());

        let base = sys::uptime();
        let shared = out.shared().clone();
        let at = |ms: u64| base + Duration::from_millis(ms);

        shared.advance(at(100), T); // Low -> High
        shared.advance(at(120), T); // mid-half: no flip
        shared.advance(at(150), T); // High -> Low, cycle 1 done
        shared.advance(at(250), T); // Low -> High
        shared.advance(at(300), T); // High -> Low, cycle 2 done
        shared.advance(at(400), T); // Low -> High
        assert!(out.is_pulse_run());
        shared.advance(at(450), T); // cycle 3 done: stop, restore desired
        assert!(!out.is_pulse_run());

        // ctor Low, pulse-start Low, 5 flips, final desired Low.
        assert_eq!(
            rig.bank.write_history(PIN),
            vec![
                Level::Low,
                Level::Low,
                Level::High,
                Level::Low,
                Level::High,
                Level::Low,
                Level::High,
                Level::Low,
            ]
        );
    }

    #[test]
    fn zero_count_pulse_is_a_no_op() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        let before = rig.bank.write_history(PIN);
        out.pulse_start(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Some(0),
            Level::Low,
        )
        .unwrap();
        assert!(!out.is_pulse_run());
        assert_eq!(rig.bank.write_history(PIN), before);
    }

    #[test]
    fn pulse_stop_forces_desired_and_is_idempotent() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(
            Duration::from_millis(10),
            Duration::from_millis(10),
            None,
            Level::High,
        )
        .unwrap();
        assert!(out.is_pulse_run());
        out.pulse_stop().unwrap();
        assert!(!out.is_pulse_run());
        assert_eq!(rig.bank.level(PIN), Level::Low);

        // Stopping again: no pulse, no write.
        let before = rig.bank.write_history(PIN);
        out.pulse_stop().unwrap();
        assert_eq!(rig.bank.write_history(PIN), before);
    }

    #[test]
    fn set_level_during_pulse_changes_only_the_resting_level() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(
            Duration::from_millis(30),
            Duration::from_millis(30),
            None,
            Level::Low,
        )
        .unwrap();

        let before = rig.bank.write_history(PIN);
        out.set_level(Level::High).unwrap();
        // No immediate write while the pulse owns the line.
        assert_eq!(rig.bank.write_history(PIN), before);

        out.pulse_stop().unwrap();
        assert_eq!(rig.bank.level(PIN), Level::High);
    }

    #[test]
    fn set_level_without_pulse_drives_immediately() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.set_level(Level::High).unwrap();
        assert_eq!(rig.bank.level(PIN), Level::High);
        out.set_level(Level::Low).unwrap();
        assert_eq!(rig.bank.level(PIN), Level::Low);
    }

    #[test]
    fn restarting_a_pulse_replaces_it() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Some(5),
            Level::Low,
        )
        .unwrap();
        out.pulse_start(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Some(1),
            Level::High,
        )
        .unwrap();
        assert_eq!(rig.bank.level(PIN), Level::High);

        let base = sys::uptime();
        let shared = out.shared().clone();
        shared.advance(base + Duration::from_millis(10), T); // High -> Low
        shared.advance(base + Duration::from_millis(120), T); // back to High: cycle done
        assert!(!out.is_pulse_run());
    }

    #[test]
    fn degenerate_zero_half_period_flips_immediately() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(Duration::ZERO, Duration::from_secs(60), None, Level::Low)
            .unwrap();
        let shared = out.shared().clone();
        shared.advance(sys::uptime(), T);
        // Low half elapses instantly; the line now rests High for a minute.
        assert_eq!(rig.bank.level(PIN), Level::High);
        assert!(out.is_pulse_run());
    }

    #[test]
    fn skipped_tick_when_owner_holds_the_lock() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        out.pulse_start(
            Duration::from_millis(1),
            Duration::from_millis(1),
            None,
            Level::Low,
        )
        .unwrap();
        let shared = out.shared().clone();
        let before = rig.bank.write_history(PIN);
        {
            let _owner = shared.state.lock();
            // Contended: advance must give up within the bounded wait
            // instead of flipping.
            shared.advance(sys::uptime() + Duration::from_secs(1), T);
        }
        assert_eq!(rig.bank.write_history(PIN), before);
    }

    #[test]
    fn debug_output_names_the_line() {
        let rig = rig();
        let out = open(&rig, Level::Low);
        let rendered = format!("{out:?}");
        assert!(rendered.contains("led"), "got: {rendered}");
    }

    #[test]
    fn drop_disconnects_and_releases() {
        let rig = rig();
        let out = open(&rig, Level::High);
        assert!(rig.arbiter.is_in_use(DeviceId::gpio(0)));
        assert_eq!(rig.poller.output_count(), 1);
        drop(out);
        assert!(!rig.arbiter.is_in_use(DeviceId::gpio(0)));
        assert_eq!(rig.poller.output_count(), 0);
        assert_eq!(rig.bank.mode(PIN), PinMode::Disconnected);
    }
}

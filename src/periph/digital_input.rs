//! Debouncing digital input driver.
//!
//! Edge detection is computed lazily at observation time: every read
//! samples the line and, on a change, records the timestamp and sets a
//! sticky "changed" flag. There is no dedicated input polling thread; a
//! transition is only noticed when somebody looks. Raw and debounced edge
//! tracking are fully independent: each keeps its own previous level and
//! its own sticky flag, so consuming a raw edge never loses a debounced one
//! and vice versa.
//!
//! A level is *debounced* once it has been stable for at least the
//! configured window; while the signal is settling, the debounced view
//! reports nothing at all rather than a possibly-transient level.

use crate::arbiter::{Arbiter, OwnershipToken};
use crate::error::Result;
use crate::hal::{GpioBank, InputPull, Level, PinMode};
use crate::periph::GPIO_WAIT;
use crate::sys;
use crate::topology::DeviceId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A level together with how long it has been held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDuration {
    /// Time elapsed since the last raw transition.
    pub duration: Duration,
    /// The current raw level.
    pub level: Level,
}

struct InputState {
    debounce: Duration,
    prev_level: Level,
    prev_level_debounced: Level,
    level_changed: bool,
    level_debounced_changed: bool,
    /// Uptime of the last raw transition.
    last_change: Duration,
}

/// Exclusively-owned digital input line.
pub struct DigitalInput {
    id: DeviceId,
    label: String,
    pin: u8,
    bank: Arc<dyn GpioBank>,
    state: Mutex<InputState>,
    _token: OwnershipToken,
}

impl DigitalInput {
    /// Open the input line at device `index` with the given pull and
    /// debounce window, priming the edge trackers from an initial sample.
    pub fn new(
        arbiter: &Arbiter,
        bank: Arc<dyn GpioBank>,
        index: u8,
        pull: InputPull,
        debounce: Duration,
    ) -> Result<Self> {
        let line = arbiter.topology().gpio_by_index(index)?.clone();
        let token = arbiter.borrow(DeviceId::gpio(index))?;
        bank.configure(line.pin, PinMode::Input(pull))?;
        let initial = bank.read(line.pin)?;
        debug!(device = %token.id(), label = %line.label, pin = line.pin, %initial, "input opened");

        Ok(Self {
            id: token.id(),
            label: line.label,
            pin: line.pin,
            bank,
            state: Mutex::new(InputState {
                debounce,
                prev_level: initial,
                prev_level_debounced: initial,
                level_changed: false,
                level_debounced_changed: false,
                last_change: sys::uptime(),
            }),
            _token: token,
        })
    }

    /// Open the input line with the given topology label.
    pub fn by_label(
        arbiter: &Arbiter,
        bank: Arc<dyn GpioBank>,
        label: &str,
        pull: InputPull,
        debounce: Duration,
    ) -> Result<Self> {
        let index = arbiter.topology().gpio_index_by_label(label)?;
        Self::new(arbiter, bank, index, pull, debounce)
    }

    /// Sample the current level, updating the edge trackers.
    pub fn level(&self) -> Result<Level> {
        let mut state = self.state.lock();
        self.sample(&mut state)
    }

    /// Sample and consume the raw sticky change flag.
    ///
    /// Exactly one call observes a given transition: if the flag is set it
    /// is cleared and the new level returned; concurrent callers serialize
    /// on the instance lock.
    pub fn is_level_changed(&self) -> Result<Option<Level>> {
        let mut state = self.state.lock();
        let level = self.sample(&mut state)?;
        if state.level_changed {
            state.level_changed = false;
            Ok(Some(level))
        } else {
            Ok(None)
        }
    }

    /// The current level and how long it has been held.
    pub fn level_duration(&self) -> Result<LevelDuration> {
        let mut state = self.state.lock();
        self.level_duration_locked(&mut state)
    }

    /// The current level, only if it has been stable for at least the
    /// debounce window; `None` while the signal is settling.
    pub fn level_debounced(&self) -> Result<Option<Level>> {
        let mut state = self.state.lock();
        self.level_debounced_locked(&mut state)
    }

    /// Sample and consume the debounced sticky change flag.
    pub fn is_level_changed_debounced(&self) -> Result<Option<Level>> {
        let mut state = self.state.lock();
        let debounced = self.level_debounced_locked(&mut state)?;
        match debounced {
            Some(level) if state.level_debounced_changed => {
                state.level_debounced_changed = false;
                Ok(Some(level))
            }
            _ => Ok(None),
        }
    }

    /// Block until the raw level equals `level`, polling every
    /// [`GPIO_WAIT`]. Unbounded: returns only when the level is seen.
    pub fn wait_level(&self, level: Level) -> Result<()> {
        while self.level()? != level {
            sys::sleep(GPIO_WAIT);
        }
        Ok(())
    }

    /// Block until the debounced level equals `level`.
    pub fn wait_level_debounced(&self, level: Level) -> Result<()> {
        while self.level_debounced()? != Some(level) {
            sys::sleep(GPIO_WAIT);
        }
        Ok(())
    }

    /// Reconfigure the debounce window; effective on subsequent samples.
    pub fn set_debounce_duration(&self, debounce: Duration) {
        self.state.lock().debounce = debounce;
    }

    /// The configured debounce window.
    pub fn debounce_duration(&self) -> Duration {
        self.state.lock().debounce
    }

    /// Device identity of this input.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Topology label of this input.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn sample(&self, state: &mut InputState) -> Result<Level> {
        let level = self.bank.read(self.pin)?;
        if level != state.prev_level {
            state.prev_level = level;
            state.last_change = sys::uptime();
            state.level_changed = true;
        }
        Ok(level)
    }

    fn level_duration_locked(&self, state: &mut InputState) -> Result<LevelDuration> {
        let level = self.sample(state)?;
        Ok(LevelDuration {
            duration: sys::uptime().saturating_sub(state.last_change),
            level,
        })
    }

    fn level_debounced_locked(&self, state: &mut InputState) -> Result<Option<Level>> {
        let held = self.level_duration_locked(state)?;
        if held.duration >= state.debounce {
            if state.prev_level_debounced != held.level {
                state.prev_level_debounced = held.level;
                state.level_debounced_changed = true;
            }
            Ok(Some(held.level))
        } else {
            Ok(None)
        }
    }
}

impl fmt::Debug for DigitalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalInput")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

impl Drop for DigitalInput {
    fn drop(&mut self) {
        if let Err(err) = self.bank.configure(self.pin, PinMode::Disconnected) {
            warn!(device = %self.id, %err, "failed to disconnect input pin");
        }
        debug!(device = %self.id, label = %self.label, "input closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeriphError;
    use crate::hal::sim::SimBank;
    use crate::topology::{GpioLine, PortMask, Topology};

    const PIN: u8 = 2;
    const DEBOUNCE: Duration = Duration::from_millis(60);
    // Comfortably past the debounce window, tolerant of scheduler jitter.
    const SETTLE: Duration = Duration::from_millis(120);

    fn arbiter() -> Arbiter {
        Arbiter::new(Topology::new(vec![GpioLine {
            index: 0,
            label: "btn".into(),
            pin: PIN,
            ports: PortMask::single(1),
        }]))
    }

    fn open(arbiter: &Arbiter, bank: &Arc<SimBank>) -> DigitalInput {
        DigitalInput::new(
            arbiter,
            bank.clone() as Arc<dyn GpioBank>,
            0,
            InputPull::Up,
            DEBOUNCE,
        )
        .unwrap()
    }

    #[test]
    fn construction_configures_and_primes() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        bank.set_input_level(PIN, Level::High);
        let input = open(&arbiter, &bank);
        assert_eq!(bank.mode(PIN), PinMode::Input(InputPull::Up));
        assert_eq!(input.level().unwrap(), Level::High);
        // Priming means the initial level is not an edge.
        assert_eq!(input.is_level_changed().unwrap(), None);
    }

    #[test]
    fn unknown_index_and_label_fail_with_no_dev() {
        let arbiter = arbiter();
        let bank: Arc<SimBank> = Arc::new(SimBank::new());
        assert!(matches!(
            DigitalInput::new(&arbiter, bank.clone(), 9, InputPull::Up, DEBOUNCE),
            Err(PeriphError::NoDev(_))
        ));
        assert!(matches!(
            DigitalInput::by_label(&arbiter, bank, "missing", InputPull::Up, DEBOUNCE),
            Err(PeriphError::NoDev(_))
        ));
    }

    #[test]
    fn second_open_fails_while_borrowed() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let first = open(&arbiter, &bank);
        assert!(matches!(
            DigitalInput::new(
                &arbiter,
                bank.clone() as Arc<dyn GpioBank>,
                0,
                InputPull::Up,
                DEBOUNCE
            ),
            Err(PeriphError::DeviceAlreadyInUse(_))
        ));
        drop(first);
        let _again = open(&arbiter, &bank);
    }

    #[test]
    fn raw_edge_is_consumed_exactly_once() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);

        bank.set_input_level(PIN, Level::High);
        assert_eq!(input.is_level_changed().unwrap(), Some(Level::High));
        assert_eq!(input.is_level_changed().unwrap(), None);

        bank.set_input_level(PIN, Level::Low);
        // A plain read also books the edge; the next consumer sees it.
        assert_eq!(input.level().unwrap(), Level::Low);
        assert_eq!(input.is_level_changed().unwrap(), Some(Level::Low));
        assert_eq!(input.is_level_changed().unwrap(), None);
    }

    #[test]
    fn debounce_suppresses_a_transient() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);

        // Let the initial Low become stable.
        sys::sleep(SETTLE);
        assert_eq!(input.level_debounced().unwrap(), Some(Level::Low));

        // Transient High, returned to Low well inside the window.
        bank.set_input_level(PIN, Level::High);
        assert_eq!(input.is_level_changed().unwrap(), Some(Level::High));
        assert_eq!(input.level_debounced().unwrap(), None);
        bank.set_input_level(PIN, Level::Low);
        assert_eq!(input.is_level_changed().unwrap(), Some(Level::Low));

        // Settling, then stable Low again; the debounced view never saw
        // High and no debounced edge ever fired.
        assert_eq!(input.level_debounced().unwrap(), None);
        sys::sleep(SETTLE);
        assert_eq!(input.level_debounced().unwrap(), Some(Level::Low));
        assert_eq!(input.is_level_changed_debounced().unwrap(), None);
    }

    #[test]
    fn debounced_edge_fires_once_after_stability() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);
        sys::sleep(SETTLE);
        assert_eq!(input.is_level_changed_debounced().unwrap(), None);

        bank.set_input_level(PIN, Level::High);
        input.level().unwrap();
        sys::sleep(SETTLE);
        assert_eq!(
            input.is_level_changed_debounced().unwrap(),
            Some(Level::High)
        );
        assert_eq!(input.is_level_changed_debounced().unwrap(), None);
    }

    #[test]
    fn raw_and_debounced_tracking_are_independent() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);
        sys::sleep(SETTLE);

        bank.set_input_level(PIN, Level::High);
        input.level().unwrap();
        sys::sleep(SETTLE);
        // Consuming the raw edge leaves the debounced edge intact.
        assert_eq!(input.is_level_changed().unwrap(), Some(Level::High));
        assert_eq!(
            input.is_level_changed_debounced().unwrap(),
            Some(Level::High)
        );
    }

    #[test]
    fn level_duration_tracks_the_last_transition() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);

        bank.set_input_level(PIN, Level::High);
        input.level().unwrap();
        sys::sleep(Duration::from_millis(30));
        let held = input.level_duration().unwrap();
        assert_eq!(held.level, Level::High);
        assert!(held.duration >= Duration::from_millis(30));
        assert!(held.duration < Duration::from_secs(5));
    }

    #[test]
    fn zero_debounce_reports_immediately() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);
        input.set_debounce_duration(Duration::ZERO);
        assert_eq!(input.debounce_duration(), Duration::ZERO);

        bank.set_input_level(PIN, Level::High);
        assert_eq!(input.level_debounced().unwrap(), Some(Level::High));
    }

    #[test]
    fn wait_level_returns_when_the_line_flips() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);

        let flipper = {
            let bank = bank.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                bank.set_input_level(PIN, Level::High);
            })
        };
        input.wait_level(Level::High).unwrap();
        assert_eq!(input.level().unwrap(), Level::High);
        flipper.join().unwrap();
    }

    #[test]
    fn wait_level_debounced_requires_stability() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);

        let flipper = {
            let bank = bank.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                bank.set_input_level(PIN, Level::High);
            })
        };
        let started = std::time::Instant::now();
        input.wait_level_debounced(Level::High).unwrap();
        // Cannot return before the signal flipped and then held for the
        // whole debounce window.
        assert!(started.elapsed() >= DEBOUNCE);
        flipper.join().unwrap();
    }

    #[test]
    fn debug_output_names_the_line() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);
        let rendered = format!("{input:?}");
        assert!(rendered.contains("btn"), "got: {rendered}");
    }

    #[test]
    fn drop_disconnects_and_releases() {
        let arbiter = arbiter();
        let bank = Arc::new(SimBank::new());
        let input = open(&arbiter, &bank);
        assert!(arbiter.is_in_use(DeviceId::gpio(0)));
        drop(input);
        assert!(!arbiter.is_in_use(DeviceId::gpio(0)));
        assert_eq!(bank.mode(PIN), PinMode::Disconnected);
    }
}

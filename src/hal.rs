//! Hardware abstraction for digital lines.
//!
//! Drivers never touch a GPIO controller directly; they go through the
//! [`GpioBank`] trait. A backend implements three single-shot operations
//! (configure, read, write), each expected to be effectively non-blocking;
//! drivers call them while holding their per-instance lock.
//!
//! [`sim::SimBank`] is a hardware-free implementation for tests and demos:
//! it tracks per-pin mode and level, lets a test drive input levels, and
//! records every write for later inspection.

use crate::error::Result;
use serde::Deserialize;
use std::fmt;
use std::ops::Not;

/// Logical level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Level {
    /// Logic low.
    Low,
    /// Logic high.
    High,
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

/// Pull resistor configuration for an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputPull {
    /// No pull resistor.
    None,
    /// Pull-up resistor.
    #[default]
    Up,
    /// Pull-down resistor.
    Down,
}

/// Electrical drive type for an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Actively driven both high and low.
    #[default]
    PushPull,
    /// Driven low, floating high.
    OpenDrain,
}

/// Electrical mode of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// High-impedance, electrically safe state.
    Disconnected,
    /// Input with the given pull configuration.
    Input(InputPull),
    /// Output with the given drive type.
    Output(OutputType),
}

/// Backend access to a bank of digital lines.
///
/// Implementations must be thread-safe: drivers on different threads and the
/// shared poller all call into the same bank. Each operation is a single
/// hardware access; none may block or sleep.
pub trait GpioBank: Send + Sync {
    /// Set the electrical mode of `pin`.
    fn configure(&self, pin: u8, mode: PinMode) -> Result<()>;

    /// Sample the current level of `pin`.
    fn read(&self, pin: u8) -> Result<Level>;

    /// Drive `pin` to `level`.
    fn write(&self, pin: u8, level: Level) -> Result<()>;
}

pub mod sim {
    //! Simulated GPIO bank for tests and demos.

    use super::{GpioBank, Level, PinMode};
    use crate::error::Result;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct SimPin {
        mode: PinMode,
        level: Level,
        writes: Vec<Level>,
    }

    impl Default for SimPin {
        fn default() -> Self {
            Self {
                mode: PinMode::Disconnected,
                level: Level::Low,
                writes: Vec::new(),
            }
        }
    }

    /// In-memory [`GpioBank`]: no hardware, full observability.
    ///
    /// Input levels float low until a test drives them with
    /// [`set_input_level`](SimBank::set_input_level). Every `write` is
    /// appended to a per-pin history so tests can assert on the exact level
    /// sequence a driver produced.
    #[derive(Debug, Default)]
    pub struct SimBank {
        pins: Mutex<HashMap<u8, SimPin>>,
    }

    impl SimBank {
        /// Create a bank with all pins disconnected and low.
        pub fn new() -> Self {
            Self::default()
        }

        /// Externally drive the level seen by an input pin.
        pub fn set_input_level(&self, pin: u8, level: Level) {
            self.pins.lock().entry(pin).or_default().level = level;
        }

        /// Current electrical mode of `pin`.
        pub fn mode(&self, pin: u8) -> PinMode {
            self.pins
                .lock()
                .get(&pin)
                .map(|p| p.mode)
                .unwrap_or(PinMode::Disconnected)
        }

        /// Every level ever written to `pin`, in order.
        pub fn write_history(&self, pin: u8) -> Vec<Level> {
            self.pins
                .lock()
                .get(&pin)
                .map(|p| p.writes.clone())
                .unwrap_or_default()
        }

        /// Current level of `pin`.
        pub fn level(&self, pin: u8) -> Level {
            self.pins
                .lock()
                .get(&pin)
                .map(|p| p.level)
                .unwrap_or(Level::Low)
        }
    }

    impl GpioBank for SimBank {
        fn configure(&self, pin: u8, mode: PinMode) -> Result<()> {
            self.pins.lock().entry(pin).or_default().mode = mode;
            Ok(())
        }

        fn read(&self, pin: u8) -> Result<Level> {
            Ok(self.level(pin))
        }

        fn write(&self, pin: u8, level: Level) -> Result<()> {
            let mut pins = self.pins.lock();
            let p = pins.entry(pin).or_default();
            p.level = level;
            p.writes.push(level);
            Ok(())
        }
    }

}

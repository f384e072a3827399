//! Peripheral access layer with exclusive device arbitration.
//!
//! This crate solves two coupled problems for small control applications:
//!
//! 1. **Ownership**: preventing two logical components from simultaneously
//!    claiming the same physical device or pin. The [`Arbiter`] tracks which
//!    device identities are borrowed and rejects both double-borrows and
//!    borrows whose port masks electrically alias an already-borrowed device.
//!    A successful borrow yields an [`OwnershipToken`] that releases the
//!    device when dropped.
//!
//! 2. **Signals**: turning raw digital-line sampling into debounced levels,
//!    edge events, and timed waveforms usable from multiple threads.
//!    [`DigitalInput`] tracks raw and debounced levels with sticky change
//!    flags; [`DigitalOutput`] drives a static level or a Low/High pulse
//!    waveform advanced by the shared [`OutputPoller`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Application threads                                      │
//! │   DigitalInput ──┐            ┌── DigitalOutput          │
//! ├──────────────────┼────────────┼──────────────────────────┤
//! │     Arbiter ←────┴── borrow ──┘──── register ──→ Poller  │
//! │        │ Topology                    (one thread, ticks  │
//! │        ▼                              every active       │
//! │     GpioBank trait  ←── read/write ── waveform)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The hardware boundary is the [`GpioBank`] trait. Production backends
//! implement it against a real GPIO controller; [`hal::sim::SimBank`] is an
//! in-memory implementation for tests and demos.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use plc_periph::hal::sim::SimBank;
//! use plc_periph::hal::{GpioBank, Level, OutputType};
//! use plc_periph::poller::{OutputPoller, PollerConfig};
//! use plc_periph::periph::DigitalOutput;
//! use plc_periph::topology::{GpioLine, PortMask, Topology};
//! use plc_periph::Arbiter;
//!
//! # fn main() -> plc_periph::Result<()> {
//! let topology = Topology::new(vec![GpioLine {
//!     index: 0,
//!     label: "led".into(),
//!     pin: 13,
//!     ports: PortMask::single(0),
//! }]);
//! let bank: Arc<dyn GpioBank> = Arc::new(SimBank::new());
//! let arbiter = Arbiter::new(topology);
//! let poller = OutputPoller::spawn(PollerConfig::default())?;
//!
//! let led = DigitalOutput::by_label(
//!     &arbiter, Arc::clone(&bank), &poller, "led",
//!     OutputType::PushPull, Level::Low,
//! )?;
//! led.pulse_start(
//!     Duration::from_millis(5), Duration::from_millis(5),
//!     Some(2), Level::Low,
//! )?;
//! led.wait_pulse_end();
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod error;
pub mod hal;
pub mod periph;
pub mod poller;
pub mod sys;
pub mod topology;

pub use arbiter::{Arbiter, OwnershipToken};
pub use error::{PeriphError, Result};
pub use hal::{GpioBank, InputPull, Level, OutputType, PinMode};
pub use periph::{DigitalInput, DigitalOutput, LevelDuration};
pub use poller::{OutputPoller, PollerConfig};
pub use topology::{DeviceClass, DeviceId, GpioLine, PortMask, Topology};

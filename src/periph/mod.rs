//! Stateful peripheral drivers built on the arbiter and the GPIO backend.
//!
//! [`DigitalInput`] turns raw line sampling into debounced levels and edge
//! events; [`DigitalOutput`] drives a static level or a timed Low/High
//! waveform advanced by the shared [`OutputPoller`](crate::OutputPoller).
//! Both borrow their device from the [`Arbiter`](crate::Arbiter) at
//! construction and release it on drop, returning the line to a
//! disconnected electrical state.

pub mod digital_input;
pub mod digital_output;

pub use digital_input::{DigitalInput, LevelDuration};
pub use digital_output::DigitalOutput;

use std::time::Duration;

/// Poll interval for the blocking `wait_*` operations and the default
/// poller tick. Bounds the latency of every polling loop in this crate.
pub const GPIO_WAIT: Duration = Duration::from_millis(4);

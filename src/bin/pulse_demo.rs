//! End-to-end demo on the simulated GPIO bank.
//!
//! Wires a TOML topology, the arbiter, and the shared poller; blinks an
//! output for a few cycles while a second thread "presses" a button that
//! the main thread watches through the debounced input view.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin pulse_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use plc_periph::hal::sim::SimBank;
use plc_periph::hal::{GpioBank, InputPull, Level, OutputType};
use plc_periph::periph::{DigitalInput, DigitalOutput};
use plc_periph::poller::{OutputPoller, PollerConfig};
use plc_periph::topology::Topology;
use plc_periph::Arbiter;
use tracing::info;

const TOPOLOGY: &str = r#"
[[gpio]]
index = 0
label = "led_status"
pin = 13
ports = [0]

[[gpio]]
index = 1
label = "btn_start"
pin = 2
ports = [1]
"#;

fn main() -> plc_periph::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let topology = Topology::from_toml_str(TOPOLOGY)?;
    let bank = Arc::new(SimBank::new());
    let arbiter = Arbiter::new(topology);
    let poller = OutputPoller::spawn(PollerConfig::default())?;

    let button = DigitalInput::by_label(
        &arbiter,
        bank.clone() as Arc<dyn GpioBank>,
        "btn_start",
        InputPull::Up,
        Duration::from_millis(50),
    )?;
    let led = DigitalOutput::by_label(
        &arbiter,
        bank.clone() as Arc<dyn GpioBank>,
        &poller,
        "led_status",
        OutputType::PushPull,
        Level::Low,
    )?;

    // Simulated operator pressing the start button.
    let presser = {
        let bank = bank.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            bank.set_input_level(2, Level::High);
        })
    };

    info!("waiting for start button");
    button.wait_level_debounced(Level::High)?;
    info!("button pressed, blinking");

    led.pulse_start(
        Duration::from_millis(100),
        Duration::from_millis(100),
        Some(5),
        Level::Low,
    )?;
    led.wait_pulse_end();
    info!(blinks = ?bank.write_history(13).len(), "pulse finished");

    presser
        .join()
        .map_err(|_| plc_periph::PeriphError::Unknown("presser thread panicked".into()))?;
    Ok(())
}

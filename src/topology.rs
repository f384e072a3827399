//! Static hardware topology: device identities, port masks, and the
//! read-only table mapping each digital line to its pin and ports.
//!
//! The topology is fixed for the life of the process. It can be built in
//! code with [`Topology::new`] or loaded from a TOML table:
//!
//! ```toml
//! [[gpio]]
//! index = 0
//! label = "led_status"
//! pin = 13
//! ports = [0]
//!
//! [[gpio]]
//! index = 1
//! label = "btn_start"
//! pin = 2
//! ports = [1, 2]
//! ```
//!
//! A device may occupy several ports (many MCU pins can be routed to one
//! port), a single port, or none at all; conflict detection in the
//! [`Arbiter`](crate::Arbiter) is driven entirely by these masks.

use crate::error::{PeriphError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Logical class of a peripheral device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DeviceClass {
    /// A digital input/output line.
    Gpio,
    /// A serial interface.
    Serial,
}

/// Logical (class, index) key identifying one peripheral instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// Device class.
    pub class: DeviceClass,
    /// Instance index within the class.
    pub index: u8,
}

impl DeviceId {
    /// Identity of the GPIO line at `index`.
    pub fn gpio(index: u8) -> Self {
        Self {
            class: DeviceClass::Gpio,
            index,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}_{}", self.class, self.index)
    }
}

/// Bitset of physical port numbers a device electrically occupies.
///
/// Port numbers range over `0..CAPACITY`; operations taking a port number
/// treat anything outside that range as not a port (never set, never
/// contained). Config loading rejects out-of-range ports outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "Vec<u8>")]
pub struct PortMask(u64);

impl PortMask {
    /// Mask occupying no ports.
    pub const EMPTY: PortMask = PortMask(0);

    /// Number of addressable ports.
    pub const CAPACITY: u8 = 64;

    /// Mask with exactly one port set.
    pub fn single(port: u8) -> Self {
        PortMask::EMPTY.with(port)
    }

    /// Mask with every listed port set.
    pub fn from_ports(ports: &[u8]) -> Self {
        ports.iter().fold(PortMask::EMPTY, |m, &p| m.with(p))
    }

    /// This mask with `port` added. Unchanged for out-of-range ports.
    pub fn with(self, port: u8) -> Self {
        if port >= Self::CAPACITY {
            return self;
        }
        PortMask(self.0 | (1u64 << port))
    }

    /// Whether `port` is set in this mask.
    pub fn contains(self, port: u8) -> bool {
        port < Self::CAPACITY && self.0 & (1u64 << port) != 0
    }

    /// Whether any port is shared between the two masks.
    pub fn intersects(self, other: PortMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the mask occupies no ports.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<Vec<u8>> for PortMask {
    type Error = String;

    fn try_from(ports: Vec<u8>) -> std::result::Result<Self, Self::Error> {
        if let Some(port) = ports.iter().find(|&&p| p >= Self::CAPACITY) {
            return Err(format!(
                "port {port} out of range (0..{})",
                Self::CAPACITY
            ));
        }
        Ok(PortMask::from_ports(&ports))
    }
}

/// One digital line in the topology table.
#[derive(Debug, Clone, Deserialize)]
pub struct GpioLine {
    /// Device index, the `index` half of its [`DeviceId`].
    pub index: u8,
    /// Human-readable label, unique within the table.
    pub label: String,
    /// Physical pin number driven by the backend.
    pub pin: u8,
    /// Ports this line electrically occupies.
    #[serde(default)]
    pub ports: PortMask,
}

/// Read-only table of all digital lines known to the process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
    /// Digital lines, keyed by index and label.
    #[serde(default)]
    pub gpio: Vec<GpioLine>,
}

impl Topology {
    /// Build a topology from an in-code table.
    ///
    /// # Panics
    ///
    /// Panics if the table contains duplicate indices or labels; in-code
    /// tables are programmer-authored, so this is a programming error.
    #[allow(clippy::panic)]
    pub fn new(gpio: Vec<GpioLine>) -> Self {
        let topo = Self { gpio };
        if let Err(err) = topo.validate() {
            panic!("invalid topology: {err}");
        }
        topo
    }

    /// Parse and validate a topology from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let topo: Topology = toml::from_str(s)?;
        topo.validate()?;
        Ok(topo)
    }

    /// Load and validate a topology from a TOML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        let mut indices = HashSet::new();
        let mut labels = HashSet::new();
        for line in &self.gpio {
            if !indices.insert(line.index) {
                return Err(PeriphError::InvalidTopology(format!(
                    "duplicate gpio index {}",
                    line.index
                )));
            }
            if !labels.insert(line.label.as_str()) {
                return Err(PeriphError::InvalidTopology(format!(
                    "duplicate gpio label '{}'",
                    line.label
                )));
            }
        }
        Ok(())
    }

    /// Look up a line by device index.
    pub fn gpio_by_index(&self, index: u8) -> Result<&GpioLine> {
        self.gpio
            .iter()
            .find(|l| l.index == index)
            .ok_or_else(|| PeriphError::NoDev(format!("{}", DeviceId::gpio(index))))
    }

    /// Resolve a label to its device index.
    pub fn gpio_index_by_label(&self, label: &str) -> Result<u8> {
        self.gpio
            .iter()
            .find(|l| l.label == label)
            .map(|l| l.index)
            .ok_or_else(|| PeriphError::NoDev(label.to_string()))
    }

    /// Ports occupied by `id`. Empty for identities not in the table.
    pub fn ports_of(&self, id: DeviceId) -> PortMask {
        match id.class {
            DeviceClass::Gpio => self
                .gpio
                .iter()
                .find(|l| l.index == id.index)
                .map(|l| l.ports)
                .unwrap_or(PortMask::EMPTY),
            DeviceClass::Serial => PortMask::EMPTY,
        }
    }
}

//! # Gateway Configuration
//!
//! Runtime settings for the CAN side, the RS-485 side and the control loop,
//! plus the persisted settings contract ([`ConfigStore`]).
//!
//! ```rust
//! use j1939_modbus_gateway::GatewayConfig;
//!
//! let config = GatewayConfig::new()
//!     .with_slave_id(12)
//!     .with_baud_rate(9600)
//!     .with_serial_port("/dev/ttyS1");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.serial.baud_rate, 9600);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_SLAVE_ID, DEFAULT_STALE_TIMEOUT_MS, J1939_BITRATE, MAX_SLAVE_ID,
    MIN_SLAVE_ID,
};
use crate::error::{GatewayError, GatewayResult};

/// Default RS-485 device
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default SocketCAN interface
pub const DEFAULT_CAN_INTERFACE: &str = "can0";

/// Default control loop period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default period of the engine summary log line
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

impl std::str::FromStr for SerialParity {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            other => Err(GatewayError::config(format!("unknown parity '{}'", other))),
        }
    }
}

/// RS-485 line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: SerialParity,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: SerialParity::None,
            stop_bits: 1,
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Modbus slave address (1-247)
    pub slave_id: u8,
    pub serial: SerialSettings,
    pub can_interface: String,
    /// Bus bitrate; the interface itself is configured outside the process
    pub can_bitrate: u32,
    /// Age after which CAN data is flagged stale
    pub stale_timeout_ms: u32,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub summary_interval: Duration,
    /// Hex dump every RTU frame at debug level
    pub packet_logging: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            slave_id: DEFAULT_SLAVE_ID,
            serial: SerialSettings::default(),
            can_interface: DEFAULT_CAN_INTERFACE.to_string(),
            can_bitrate: J1939_BITRATE,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT_MS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            summary_interval: DEFAULT_SUMMARY_INTERVAL,
            packet_logging: false,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> GatewayResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_serial_port(mut self, port: impl Into<String>) -> Self {
        self.serial.port = port.into();
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial.baud_rate = baud_rate;
        self
    }

    pub fn with_parity(mut self, parity: SerialParity) -> Self {
        self.serial.parity = parity;
        self
    }

    pub fn with_can_interface(mut self, interface: impl Into<String>) -> Self {
        self.can_interface = interface.into();
        self
    }

    pub fn with_stale_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.stale_timeout_ms = timeout_ms;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_summary_interval(mut self, interval: Duration) -> Self {
        self.summary_interval = interval;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        validate_slave_id(self.slave_id)?;
        validate_baud_rate(self.serial.baud_rate)?;

        if self.serial.port.is_empty() {
            return Err(GatewayError::config("serial port must not be empty"));
        }
        if !matches!(self.serial.data_bits, 7 | 8) {
            return Err(GatewayError::config(format!(
                "data bits must be 7 or 8, got {}",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(GatewayError::config(format!(
                "stop bits must be 1 or 2, got {}",
                self.serial.stop_bits
            )));
        }
        if self.can_interface.is_empty() {
            return Err(GatewayError::config("CAN interface must not be empty"));
        }
        if self.stale_timeout_ms == 0 {
            return Err(GatewayError::config("stale timeout must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(GatewayError::config("poll interval must be non-zero"));
        }
        Ok(())
    }
}

fn validate_slave_id(slave_id: u8) -> GatewayResult<()> {
    if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
        return Err(GatewayError::config(format!(
            "slave address {} outside {}-{}",
            slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
        )));
    }
    Ok(())
}

fn validate_baud_rate(baud_rate: u32) -> GatewayResult<()> {
    if baud_rate == 0 {
        return Err(GatewayError::config("baud rate must be non-zero"));
    }
    Ok(())
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Network join credentials handed to the provisioning subsystem
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
}

impl NetworkCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted operator settings
pub trait ConfigStore {
    fn slave_address(&self) -> u8;
    fn set_slave_address(&mut self, slave_id: u8) -> GatewayResult<()>;

    fn baud_rate(&self) -> u32;
    fn set_baud_rate(&mut self, baud_rate: u32) -> GatewayResult<()>;

    fn credentials(&self) -> Option<&NetworkCredentials>;
    fn set_credentials(&mut self, credentials: NetworkCredentials) -> GatewayResult<()>;

    /// Overlay the stored values onto `base`
    fn gateway_config(&self, base: GatewayConfig) -> GatewayConfig {
        base.with_slave_id(self.slave_address())
            .with_baud_rate(self.baud_rate())
    }
}

/// Volatile [`ConfigStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfigStore {
    slave_id: u8,
    baud_rate: u32,
    credentials: Option<NetworkCredentials>,
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self {
            slave_id: DEFAULT_SLAVE_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            credentials: None,
        }
    }
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn slave_address(&self) -> u8 {
        self.slave_id
    }

    fn set_slave_address(&mut self, slave_id: u8) -> GatewayResult<()> {
        validate_slave_id(slave_id)?;
        self.slave_id = slave_id;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> GatewayResult<()> {
        validate_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn credentials(&self) -> Option<&NetworkCredentials> {
        self.credentials.as_ref()
    }

    fn set_credentials(&mut self, credentials: NetworkCredentials) -> GatewayResult<()> {
        if !credentials.is_configured() {
            return Err(GatewayError::config("network SSID must not be empty"));
        }
        self.credentials = Some(credentials);
        Ok(())
    }
}

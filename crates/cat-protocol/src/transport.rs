//! Transport seam between the CAT pipeline and the physical link
//!
//! The pipeline never talks to a serial port directly. A [`Connector`] opens
//! a [`Transport`] from a [`SerialConfig`], and the transport is then shared
//! by the listener (reads) and the sender (writes) for one run. Real serial
//! ports and simulated rigs both implement these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Parity setting for the serial link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Stop bits for the serial link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Flow control for the serial link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial port settings for one rig
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
    /// Default read deadline in milliseconds
    pub read_timeout_ms: u64,
    /// Write deadline in milliseconds
    pub write_timeout_ms: u64,
    /// Byte sequence ending each response line
    pub line_terminator: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 38400,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout_ms: 100,
            write_timeout_ms: 500,
            line_terminator: ";".to_string(),
        }
    }
}

impl SerialConfig {
    /// Create settings for a port at the given baud rate
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Write deadline as a [`Duration`]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// An open, bidirectional line-oriented link to a rig
///
/// Methods take `&self` so that reads and writes can proceed concurrently
/// from different tasks; implementations synchronize internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read one response line, waiting at most `timeout`
    ///
    /// Returns [`TransportError::Timeout`] when nothing complete arrived in
    /// time. The line terminator is not included in the result.
    async fn read_response(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write one formatted command
    async fn write_command(&self, command: &str) -> Result<(), TransportError>;

    /// Close the link; subsequent reads and writes fail with `Closed`
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports from serial settings
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport for the given settings
    async fn open(&self, config: &SerialConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

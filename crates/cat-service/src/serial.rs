//! Serial transport on top of tokio-serial
//!
//! [`LineTransport`] frames an arbitrary async byte stream into
//! terminator-delimited response lines. It is generic over the I/O type so
//! the same code runs against a real [`SerialStream`] or an in-memory
//! `tokio::io::duplex()` pair in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cat_protocol::{
    Connector, FlowControl, Parity, SerialConfig, StopBits, Transport, TransportError,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Upper bound on buffered bytes while waiting for a terminator
const MAX_PENDING_BYTES: usize = 4096;

/// Opens [`LineTransport`]s over real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl SerialConnector {
    /// Create a serial connector
    pub fn new() -> Self {
        Self
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, config: &SerialConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let stream = tokio_serial::new(config.port.as_str(), config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits))
            .flow_control(flow_control(config.flow_control))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open_native_async()
            .map_err(|e| TransportError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        info!(port = %config.port, baud = config.baud_rate, "serial port opened");
        let transport: LineTransport<SerialStream> = LineTransport::new(stream, config);
        Ok(Arc::new(transport))
    }
}

struct LineReader<T> {
    io: ReadHalf<T>,
    pending: Vec<u8>,
    chunk: Vec<u8>,
}

impl<T: AsyncRead> LineReader<T> {
    /// Pop one complete line from the pending buffer
    fn take_line(&mut self, terminator: &[u8]) -> Option<Vec<u8>> {
        let pos = self
            .pending
            .windows(terminator.len())
            .position(|w| w == terminator)?;
        let mut line: Vec<u8> = self.pending.drain(..pos + terminator.len()).collect();
        line.truncate(pos);
        let start = line
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(line.len());
        line.drain(..start);
        Some(line)
    }

    /// Read until a full line is buffered
    ///
    /// Cancel-safe: partially received bytes stay in `pending`.
    async fn next_line(&mut self, terminator: &[u8]) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(line) = self.take_line(terminator) {
                return Ok(line);
            }
            let n = self.io.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.pending.extend_from_slice(&self.chunk[..n]);
            if self.pending.len() > MAX_PENDING_BYTES {
                let start = self.pending.len() - MAX_PENDING_BYTES / 2;
                debug!(discarded = start, "no terminator seen, trimming receive buffer");
                self.pending.drain(..start);
            }
        }
    }
}

/// Terminator-framed transport over any async byte stream
///
/// Reads and writes use separate halves, each behind its own lock, so a
/// pending read never holds up a command write.
pub struct LineTransport<T> {
    reader: Mutex<LineReader<T>>,
    writer: Mutex<WriteHalf<T>>,
    terminator: Vec<u8>,
    write_timeout: Duration,
    closed: AtomicBool,
}

impl<T> std::fmt::Debug for LineTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport")
            .field("terminator", &String::from_utf8_lossy(&self.terminator))
            .field("write_timeout", &self.write_timeout)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> LineTransport<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    /// Wrap a stream using the framing and write deadline from `config`
    pub fn new(io: T, config: &SerialConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        let terminator = if config.line_terminator.is_empty() {
            b";".to_vec()
        } else {
            config.line_terminator.as_bytes().to_vec()
        };
        Self {
            reader: Mutex::new(LineReader {
                io: read_half,
                pending: Vec::with_capacity(256),
                chunk: vec![0u8; 256],
            }),
            writer: Mutex::new(write_half),
            terminator,
            write_timeout: config.write_timeout().max(Duration::from_millis(1)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<T> Transport for LineTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_response(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(timeout, reader.next_line(&self.terminator)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn write_command(&self, command: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(command.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Io(format!(
                "write timed out after {}ms",
                self.write_timeout.as_millis()
            ))),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(TransportError::from)
    }
}

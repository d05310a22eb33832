//! Simulated serial link
//!
//! [`SimLink`] is the shared "wire" between a test (or the monitor's
//! simulation mode) and the service. The service side sees it through
//! [`SimConnector`] and [`SimTransport`], which behave like a framed serial
//! port: reads return one terminator-stripped line or time out. The test side
//! scripts inbound lines, injects faults, attaches a [`VirtualRig`] and
//! inspects what was written and how often the link was opened and closed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cat_protocol::{Connector, SerialConfig, Transport, TransportError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::VirtualRig;

#[derive(Debug, Default)]
struct LinkState {
    rig: Option<VirtualRig>,
    inbound: VecDeque<Vec<u8>>,
    read_faults: VecDeque<TransportError>,
    write_faults: VecDeque<TransportError>,
    open_fault: Option<TransportError>,
    close_fault: Option<TransportError>,
    written: Vec<String>,
    write_delay: Duration,
    open: bool,
    /// Bumped on every open so handles from an earlier session stay closed
    generation: u64,
    opens: usize,
    closes: usize,
}

impl LinkState {
    fn check_open(&self, generation: u64) -> Result<(), TransportError> {
        if self.open && self.generation == generation {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// Move rig output onto the inbound queue, one line per response
    fn pump_rig(&mut self) -> bool {
        let Some(rig) = self.rig.as_mut() else {
            return false;
        };
        let mut pumped = false;
        while let Some(output) = rig.take_output() {
            for line in output.split(';').filter(|l| !l.is_empty()) {
                self.inbound.push_back(line.as_bytes().to_vec());
                pumped = true;
            }
        }
        pumped
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<LinkState>,
    readable: Notify,
}

/// Control side of a simulated serial link
#[derive(Debug, Clone, Default)]
pub struct SimLink {
    inner: Arc<Inner>,
}

impl SimLink {
    /// An idle link with no rig attached
    pub fn new() -> Self {
        Self::default()
    }

    /// A link whose host writes are answered by `rig`
    pub fn with_rig(rig: VirtualRig) -> Self {
        let link = Self::new();
        link.state().rig = Some(rig);
        link
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector handing out transports bound to this link
    pub fn connector(&self) -> SimConnector {
        SimConnector { link: self.clone() }
    }

    /// Queue one inbound line (without terminator)
    pub fn push_line(&self, line: impl Into<Vec<u8>>) {
        self.state().inbound.push_back(line.into());
        self.inner.readable.notify_waiters();
    }

    /// Make the next read fail with `err`
    pub fn push_read_error(&self, err: TransportError) {
        self.state().read_faults.push_back(err);
        self.inner.readable.notify_waiters();
    }

    /// Make the next write fail with `err`
    pub fn push_write_error(&self, err: TransportError) {
        self.state().write_faults.push_back(err);
    }

    /// Make the next open fail with `err`
    pub fn fail_next_open(&self, err: TransportError) {
        self.state().open_fault = Some(err);
    }

    /// Make the next close fail with `err`
    pub fn fail_next_close(&self, err: TransportError) {
        self.state().close_fault = Some(err);
    }

    /// Hold every subsequent write for `delay` before it lands
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    /// Every command written so far, oldest first
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Drive the attached rig; its output becomes readable on the link
    pub fn with_rig_mut<R>(&self, f: impl FnOnce(&mut VirtualRig) -> R) -> Option<R> {
        let mut state = self.state();
        let result = state.rig.as_mut().map(f);
        let pumped = state.pump_rig();
        drop(state);
        if pumped {
            self.inner.readable.notify_waiters();
        }
        result
    }
}

/// Opens [`SimTransport`]s on a [`SimLink`]
#[derive(Debug, Clone)]
pub struct SimConnector {
    link: SimLink,
}

#[async_trait]
impl Connector for SimConnector {
    async fn open(&self, config: &SerialConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let mut state = self.link.state();
        if let Some(err) = state.open_fault.take() {
            debug!("Simulated open of {} failed: {}", config.port, err);
            return Err(err);
        }
        state.open = true;
        state.generation += 1;
        state.opens += 1;
        debug!("Simulated link {} opened (session {})", config.port, state.generation);

        Ok(Arc::new(SimTransport {
            link: self.link.clone(),
            generation: state.generation,
        }))
    }
}

/// Service side of a [`SimLink`]
#[derive(Debug)]
pub struct SimTransport {
    link: SimLink,
    generation: u64,
}

#[async_trait]
impl Transport for SimTransport {
    async fn read_response(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let readable = self.link.inner.readable.notified();
            {
                let mut state = self.link.state();
                state.check_open(self.generation)?;
                if let Some(err) = state.read_faults.pop_front() {
                    return Err(err);
                }
                if let Some(line) = state.inbound.pop_front() {
                    return Ok(line);
                }
            }
            if tokio::time::timeout_at(deadline, readable).await.is_err() {
                return Err(TransportError::Timeout(timeout.as_millis() as u64));
            }
        }
    }

    async fn write_command(&self, command: &str) -> Result<(), TransportError> {
        let delay = self.link.state().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let pumped = {
            let mut state = self.link.state();
            state.check_open(self.generation)?;
            if let Some(err) = state.write_faults.pop_front() {
                return Err(err);
            }
            state.written.push(command.to_string());
            if let Some(rig) = state.rig.as_mut() {
                rig.process_input(command);
            }
            state.pump_rig()
        };
        if pumped {
            self.link.inner.readable.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let fault = {
            let mut state = self.link.state();
            state.closes += 1;
            if state.generation == self.generation {
                state.open = false;
            }
            state.close_fault.take()
        };
        self.link.inner.readable.notify_waiters();
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SerialConfig {
        SerialConfig::new("sim0", 38400)
    }

    #[tokio::test]
    async fn test_scripted_lines() {
        let link = SimLink::new();
        let transport = link.connector().open(&config()).await.unwrap();

        link.push_line("FA00014250000");
        assert_eq!(
            transport.read_response(Duration::from_millis(50)).await.unwrap(),
            b"FA00014250000"
        );
        assert!(transport
            .read_response(Duration::from_millis(10))
            .await
            .unwrap_err()
            .is_timeout());
    }

    #[tokio::test]
    async fn test_read_wakes_on_push() {
        let link = SimLink::new();
        let transport = link.connector().open(&config()).await.unwrap();

        let pusher = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher.push_line("MD2");
        });
        assert_eq!(
            transport.read_response(Duration::from_secs(1)).await.unwrap(),
            b"MD2"
        );
    }

    #[tokio::test]
    async fn test_rig_answers_writes() {
        let link = SimLink::with_rig(VirtualRig::new("Sim"));
        let transport = link.connector().open(&config()).await.unwrap();

        transport.write_command("FA;").await.unwrap();
        assert_eq!(link.written(), vec!["FA;".to_string()]);
        assert_eq!(
            transport.read_response(Duration::from_millis(50)).await.unwrap(),
            b"FA00014250000"
        );

        link.with_rig_mut(|rig| rig.set_mode(3));
        assert_eq!(
            transport.read_response(Duration::from_millis(50)).await.unwrap(),
            b"MD3"
        );
    }

    #[tokio::test]
    async fn test_faults() {
        let link = SimLink::new();
        link.fail_next_open(TransportError::Open {
            port: "sim0".into(),
            reason: "busy".into(),
        });
        assert!(link.connector().open(&config()).await.is_err());

        let transport = link.connector().open(&config()).await.unwrap();
        link.push_read_error(TransportError::Io("framing".into()));
        link.push_write_error(TransportError::Io("stalled".into()));
        assert_eq!(
            transport.read_response(Duration::from_millis(10)).await,
            Err(TransportError::Io("framing".into()))
        );
        assert!(transport.write_command("FA;").await.is_err());
        assert!(link.written().is_empty());
    }

    #[tokio::test]
    async fn test_close_counts_and_stale_handles() {
        let link = SimLink::new();
        let first = link.connector().open(&config()).await.unwrap();
        first.close().await.unwrap();
        assert!(!link.is_open());

        let second = link.connector().open(&config()).await.unwrap();
        assert_eq!(first.write_command("FA;").await, Err(TransportError::Closed));
        second.write_command("FA;").await.unwrap();

        link.fail_next_close(TransportError::Io("stuck".into()));
        assert!(second.close().await.is_err());
        assert_eq!(link.open_count(), 2);
        assert_eq!(link.close_count(), 2);
    }
}

//! Sender worker: send queue -> transport

use std::sync::Arc;

use cat_protocol::{OutboundCommand, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Write queued commands until cancelled
///
/// A failed write is logged and the command is lost; the worker keeps going.
pub(crate) async fn run_sender(
    transport: Arc<dyn Transport>,
    mut commands_rx: mpsc::Receiver<OutboundCommand>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands_rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = transport.write_command(&command.text) => result,
        };

        match result {
            Ok(()) => debug!(command = %command.name, text = %command.text, "command written"),
            Err(e) => warn!(command = %command.name, error = %e, "failed to write command"),
        }
    }
}

//! Listener worker: transport -> state table -> processing queue

use std::sync::Arc;
use std::time::Duration;

use cat_protocol::{MatchedLine, StateTable, Transport};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What the listener did with one inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineDisposition {
    /// No state definition matched; line discarded
    Unmatched,
    /// Matched and queued for processing
    Queued,
    /// Matched but the processing queue was full or gone
    Dropped,
}

/// Match one raw line and offer it to the processing queue without blocking
pub(crate) fn dispatch_line(
    table: &StateTable,
    lines_tx: &mpsc::Sender<MatchedLine>,
    line: &[u8],
) -> LineDisposition {
    let Some(matched) = table.match_line(line) else {
        trace!(line = %String::from_utf8_lossy(line), "unrecognized line");
        return LineDisposition::Unmatched;
    };

    match lines_tx.try_send(matched) {
        Ok(()) => LineDisposition::Queued,
        Err(TrySendError::Full(matched)) => {
            warn!(prefix = %matched.prefix, "processing queue full, dropping line");
            LineDisposition::Dropped
        }
        Err(TrySendError::Closed(matched)) => {
            debug!(prefix = %matched.prefix, "processing queue closed, dropping line");
            LineDisposition::Dropped
        }
    }
}

/// Poll the transport once per tick until cancelled
///
/// Read timeouts are normal idle ticks. Other read errors are logged and the
/// loop carries on; only cancellation ends it, including mid-read.
pub(crate) async fn run_listener(
    transport: Arc<dyn Transport>,
    table: Arc<StateTable>,
    lines_tx: mpsc::Sender<MatchedLine>,
    poll_interval: Duration,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = transport.read_response(read_timeout) => result,
        };

        match result {
            Ok(line) if line.is_empty() => {}
            Ok(line) => {
                dispatch_line(&table, &lines_tx, &line);
            }
            Err(e) if e.is_timeout() => {}
            Err(e) => warn!(error = %e, "transport read failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cat_protocol::{Marker, StateDefinition};

    fn table() -> StateTable {
        StateTable::build(&[
            StateDefinition::new("FA", vec![Marker::new(0, 11, "VFOA")]),
            StateDefinition::new("IF", vec![]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_matched_line() {
        let (tx, mut rx) = mpsc::channel(1);
        assert_eq!(
            dispatch_line(&table(), &tx, b"FA00014250000"),
            LineDisposition::Queued
        );
        let matched = rx.recv().await.unwrap();
        assert_eq!(matched.prefix, "FA");
        assert_eq!(matched.data, b"00014250000");
    }

    #[tokio::test]
    async fn test_dispatch_unmatched_line() {
        let (tx, mut rx) = mpsc::channel(1);
        assert_eq!(dispatch_line(&table(), &tx, b"ZZ123"), LineDisposition::Unmatched);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let t = table();
        assert_eq!(dispatch_line(&t, &tx, b"FA1"), LineDisposition::Queued);
        assert_eq!(dispatch_line(&t, &tx, b"FA2"), LineDisposition::Dropped);
        assert_eq!(rx.recv().await.unwrap().data, b"1");
    }
}

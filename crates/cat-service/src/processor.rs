//! Processor worker: matched lines -> status snapshots -> mailbox

use cat_protocol::{extract_status, MatchedLine};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mailbox::{PublishOutcome, StatusMailbox};

/// Extract and publish one matched line
///
/// Returns `None` only for a state without markers. A line whose markers all
/// fell outside the payload still publishes its (empty) snapshot.
pub(crate) fn process_line(
    line: &MatchedLine,
    mailbox: &StatusMailbox,
    cancel: &CancellationToken,
) -> Option<PublishOutcome> {
    if line.markers.is_empty() {
        debug!(prefix = %line.prefix, "state has no markers, nothing to extract");
        return None;
    }

    let snapshot = extract_status(line);
    if snapshot.is_empty() {
        debug!(prefix = %line.prefix, data = %line.data_lossy(), "no marker resolved");
    }

    Some(mailbox.publish(snapshot, cancel))
}

/// Drain the processing queue until cancelled
pub(crate) async fn run_processor(
    mut lines_rx: mpsc::Receiver<MatchedLine>,
    mailbox: StatusMailbox,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        debug!(prefix = %line.prefix, data = %line.data_lossy(), "processing line");
        process_line(&line, &mailbox, &cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cat_protocol::Marker;

    fn matched(data: &str, markers: Vec<Marker>) -> MatchedLine {
        MatchedLine {
            prefix: "MD".into(),
            markers,
            data: data.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_no_markers_publishes_nothing() {
        let mailbox = StatusMailbox::new(1);
        let out = process_line(&matched("2", vec![]), &mailbox, &CancellationToken::new());
        assert_eq!(out, None);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_all_markers_skipped_publishes_empty_snapshot() {
        let mailbox = StatusMailbox::new(1);
        let line = matched("2", vec![Marker::new(5, 1, "MODE")]);
        assert_eq!(
            process_line(&line, &mailbox, &CancellationToken::new()),
            Some(PublishOutcome::Delivered)
        );
        let status = mailbox.try_recv().unwrap();
        assert!(status.is_empty());
    }

    #[test]
    fn test_publishes_mapped_value() {
        let mailbox = StatusMailbox::new(1);
        let line = matched("2", vec![Marker::new(0, 1, "MODE").with_mapping("2", "USB")]);
        assert_eq!(
            process_line(&line, &mailbox, &CancellationToken::new()),
            Some(PublishOutcome::Delivered)
        );
        assert_eq!(mailbox.try_recv().unwrap().get("MODE"), Some("USB"));
    }

    #[tokio::test]
    async fn test_run_processor_stops_on_cancel() {
        let (tx, rx) = mpsc::channel(4);
        let mailbox = StatusMailbox::new(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_processor(rx, mailbox.clone(), cancel.clone()));

        tx.send(matched("1", vec![Marker::new(0, 1, "MODE")]))
            .await
            .unwrap();
        let status = mailbox.receiver().recv().await.unwrap();
        assert_eq!(status.get("MODE"), Some("1"));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Event sources.

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use super::ChangeEvent;
use crate::error::{SearchError, SearchResult};

/// Default buffer between a stream and the reindexer workers.
pub const DEFAULT_CHANNEL_SIZE: usize = 32;

type Acker = Box<dyn FnOnce() + Send>;

/// One received event and its acknowledgement handle.
pub struct Delivery {
    pub event: ChangeEvent,
    acker: Option<Acker>,
}

impl Delivery {
    pub fn new(event: ChangeEvent, acker: impl FnOnce() + Send + 'static) -> Self {
        Self {
            event,
            acker: Some(Box::new(acker)),
        }
    }

    /// Delivery from a source without acknowledgement semantics.
    pub fn unacked(event: ChangeEvent) -> Self {
        Self { event, acker: None }
    }

    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

pub trait EventStream: Send + Sync {
    /// Deliveries for the given event types; every type when empty.
    ///
    /// The receiver disconnects when the stream ends.
    fn consume(&self, subjects: &[&str]) -> SearchResult<Receiver<Delivery>>;
}

/// Forwards matching deliveries and acknowledges the rest on the spot.
fn filtered(source: Receiver<Delivery>, subjects: &[&str]) -> Receiver<Delivery> {
    if subjects.is_empty() {
        return source;
    }
    let subjects: Vec<String> = subjects.iter().map(|s| (*s).to_string()).collect();
    let (tx, rx) = bounded(DEFAULT_CHANNEL_SIZE);
    thread::spawn(move || {
        for delivery in source.iter() {
            let kind = delivery.event.kind.name();
            if subjects.iter().any(|s| s == kind) {
                if tx.send(delivery).is_err() {
                    break;
                }
            } else {
                tracing::trace!(kind, "event not subscribed, acking");
                delivery.ack();
            }
        }
    });
    rx
}

/// In-process stream backed by a bounded channel.
///
/// Records every acknowledged event so callers can observe completion;
/// redelivery is publishing the same event again.
pub struct ChannelStream {
    tx: Mutex<Option<Sender<Delivery>>>,
    rx: Receiver<Delivery>,
    acked: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl ChannelStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            acked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn publish(&self, event: ChangeEvent) -> SearchResult<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| SearchError::Internal("event stream closed".into()))?;
        let acked = Arc::clone(&self.acked);
        let record = event.clone();
        tx.send(Delivery::new(event, move || acked.lock().push(record)))
            .map_err(|_| SearchError::Internal("event stream has no consumer".into()))
    }

    /// Ends the stream once buffered deliveries are drained.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn acked(&self) -> Vec<ChangeEvent> {
        self.acked.lock().clone()
    }

    pub fn acked_count(&self) -> usize {
        self.acked.lock().len()
    }
}

impl Default for ChannelStream {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_SIZE)
    }
}

impl EventStream for ChannelStream {
    fn consume(&self, subjects: &[&str]) -> SearchResult<Receiver<Delivery>> {
        Ok(filtered(self.rx.clone(), subjects))
    }
}

/// Events read as JSON lines from a reader (stdin, a spool file).
///
/// Lines that do not parse are logged and skipped. The stream ends at EOF.
pub struct JsonLinesStream<R> {
    reader: Mutex<Option<R>>,
    channel_size: usize,
}

impl<R: BufRead + Send + 'static> JsonLinesStream<R> {
    pub fn new(reader: R) -> Self {
        Self::with_channel_size(reader, DEFAULT_CHANNEL_SIZE)
    }

    pub fn with_channel_size(reader: R, channel_size: usize) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            channel_size: channel_size.max(1),
        }
    }
}

impl<R: BufRead + Send + 'static> EventStream for JsonLinesStream<R> {
    fn consume(&self, subjects: &[&str]) -> SearchResult<Receiver<Delivery>> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| SearchError::Internal("json-lines stream already consumed".into()))?;
        let (tx, rx) = bounded(self.channel_size);
        thread::spawn(move || {
            for (index, line) in reader.lines().enumerate() {
                let line_no = index + 1;
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(line = line_no, error = %e, "event stream read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event: ChangeEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(line = line_no, error = %e, "skipping malformed event");
                        continue;
                    }
                };
                let delivery = Delivery::new(event, move || {
                    tracing::trace!(line = line_no, "event acked");
                });
                if tx.send(delivery).is_err() {
                    break;
                }
            }
            tracing::debug!("event stream reached end of input");
        });
        Ok(filtered(rx, subjects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::io::Cursor;

    #[test]
    fn json_lines_skip_garbage_and_end_at_eof() {
        let input = concat!(
            r#"{"type":"FileTouched","space_id":"s","item_id":"1"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"type":"ItemTrashed","space_id":"s","item_id":"2"}"#,
            "\n",
        );
        let stream = JsonLinesStream::new(Cursor::new(input));
        let rx = stream.consume(&[]).unwrap();
        let kinds: Vec<_> = rx.iter().map(|d| d.event.kind.name()).collect();
        assert_eq!(kinds, vec!["FileTouched", "ItemTrashed"]);
        assert!(stream.consume(&[]).is_err(), "single consumer");
    }

    #[test]
    fn subjects_filter_and_ack_the_rest() {
        let stream = ChannelStream::new(8);
        let rx = stream.consume(&["ItemTrashed"]).unwrap();
        stream
            .publish(ChangeEvent::new("s", "1", EventKind::FileTouched))
            .unwrap();
        stream
            .publish(ChangeEvent::new("s", "2", EventKind::ItemTrashed))
            .unwrap();
        stream.close();

        let received: Vec<Delivery> = rx.iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event.item_id, "2");
        assert_eq!(stream.acked_count(), 1, "filtered event acked");
        for d in received {
            d.ack();
        }
        assert_eq!(stream.acked_count(), 2);
    }

    #[test]
    fn publish_after_close_fails() {
        let stream = ChannelStream::default();
        stream.close();
        assert!(
            stream
                .publish(ChangeEvent::new("s", "1", EventKind::FileTouched))
                .is_err()
        );
    }
}

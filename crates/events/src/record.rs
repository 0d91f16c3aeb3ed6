//! Transport-level record: topic + key + opaque bytes.

use std::sync::mpsc;

use tracing::debug;

/// Topic carrying user lifecycle events.
pub const USER_EVENTS_TOPIC: &str = "user-events";

/// Topic naming convention: `<entity>-events`.
pub fn events_topic(entity: &str) -> String {
    format!("{entity}-events")
}

/// Messages that carry a partitioning key.
///
/// Consumers route by this key so every message for one entity lands on the
/// same single-threaded partition, preserving emission order for that entity.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Messages a transport wants confirmed once the consumer is done with them.
pub trait Acknowledge {
    /// Detach the receipt, if the transport attached one.
    fn take_receipt(&mut self) -> Option<DeliveryReceipt> {
        None
    }
}

/// Confirmation handle for one delivered entry.
///
/// Settling reports the entry id back to the transport that delivered it.
/// A receipt dropped unsettled leaves the entry unconfirmed, and the
/// transport delivers it again later.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    id: String,
    settled: mpsc::Sender<String>,
}

impl DeliveryReceipt {
    pub fn new(id: impl Into<String>, settled: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            settled,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settle(self) {
        if self.settled.send(self.id).is_err() {
            debug!("transport reader gone; receipt not delivered");
        }
    }
}

/// One message on a per-key ordered log.
///
/// The value is kept as raw bytes so decoding (and therefore the handling of
/// malformed messages) happens in the consumer, one message at a time.
#[derive(Debug, Clone)]
pub struct TransportRecord {
    topic: String,
    key: String,
    value: Vec<u8>,
    receipt: Option<DeliveryReceipt>,
}

impl TransportRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value,
            receipt: None,
        }
    }

    /// Attach the receipt the consumer settles after handling this record.
    pub fn with_receipt(mut self, receipt: DeliveryReceipt) -> Self {
        self.receipt = Some(receipt);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

// Receipts are delivery bookkeeping, not content.
impl PartialEq for TransportRecord {
    fn eq(&self, other: &Self) -> bool {
        self.topic == other.topic && self.key == other.key && self.value == other.value
    }
}

impl Eq for TransportRecord {}

impl Keyed for TransportRecord {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Acknowledge for TransportRecord {
    fn take_receipt(&mut self) -> Option<DeliveryReceipt> {
        self.receipt.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_follows_entity_convention() {
        assert_eq!(events_topic("user"), USER_EVENTS_TOPIC);
    }

    #[test]
    fn settling_reports_the_entry_id() {
        let (tx, rx) = mpsc::channel();
        let mut record = TransportRecord::new(USER_EVENTS_TOPIC, "100", b"{}".to_vec())
            .with_receipt(DeliveryReceipt::new("1700000000000-0", tx));

        let receipt = record.take_receipt().unwrap();
        assert!(record.take_receipt().is_none());
        assert!(rx.try_recv().is_err());

        receipt.settle();
        assert_eq!(rx.try_recv().unwrap(), "1700000000000-0");
    }

    #[test]
    fn dropped_receipt_confirms_nothing() {
        let (tx, rx) = mpsc::channel::<String>();
        let record = TransportRecord::new(USER_EVENTS_TOPIC, "100", Vec::new())
            .with_receipt(DeliveryReceipt::new("1-0", tx));
        drop(record);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn receipt_does_not_affect_equality() {
        let (tx, _rx) = mpsc::channel();
        let plain = TransportRecord::new(USER_EVENTS_TOPIC, "100", vec![1]);
        let tracked = plain.clone().with_receipt(DeliveryReceipt::new("1-0", tx));
        assert_eq!(plain, tracked);
    }
}

//! Producer interface
//!
//! Sensors and other local data sources publish readings through a
//! [`ProducerHandle`]. Pushing never blocks and never touches protocol
//! state; the client's event loop drains the channel and applies each
//! reading to the resource model.

use tokio::sync::mpsc;

use crate::path::Path;
use crate::value::Value;

/// One value reported by a local producer
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub object_id: u16,
    pub instance_id: u16,
    pub resource_id: u16,
    pub value: Value,
    /// Seconds since the Unix epoch at which the value was measured
    pub timestamp: Option<i64>,
}

impl Reading {
    pub fn new(path: Path, value: impl Into<Value>) -> Self {
        Self {
            object_id: path.object,
            instance_id: path.instance.unwrap_or_default(),
            resource_id: path.resource.unwrap_or_default(),
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn path(&self) -> Path {
        Path::resource(self.object_id, self.instance_id, self.resource_id)
    }
}

/// Cloneable, thread-safe sender of readings
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    tx: mpsc::UnboundedSender<Reading>,
}

impl ProducerHandle {
    /// Create a handle and the receiving end consumed by the client
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Reading>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish a reading; fire-and-forget
    ///
    /// Returns false once the client has stopped.
    pub fn push_reading(
        &self,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        value: impl Into<Value>,
        timestamp: Option<i64>,
    ) -> bool {
        self.push(Reading {
            object_id,
            instance_id,
            resource_id,
            value: value.into(),
            timestamp,
        })
    }

    pub fn push(&self, reading: Reading) -> bool {
        self.tx.send(reading).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_from_another_thread() {
        let (handle, mut rx) = ProducerHandle::channel();
        let producer = handle.clone();
        std::thread::spawn(move || {
            assert!(producer.push_reading(3, 0, 9, 87i64, Some(1_700_000_000)));
        })
        .join()
        .unwrap();

        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.path(), Path::resource(3, 0, 9));
        assert_eq!(reading.value, Value::Integer(87));
    }

    #[test]
    fn test_push_after_close() {
        let (handle, rx) = ProducerHandle::channel();
        drop(rx);
        assert!(!handle.push(Reading::new(Path::resource(3, 0, 9), 1i64)));
    }
}

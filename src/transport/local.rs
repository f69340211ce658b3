//! An in-process loopback [`Transport`], standing in for a real pub/sub
//! backend in tests and the `demos/` binaries. Grounded on the teacher's
//! `mcp/test_support.rs`, which provides an in-memory stand-in transport
//! for the same reason: exercising the protocol logic without a live
//! external dependency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::TransportError;

use super::{RawMessage, Transport};

/// A shared, in-memory message bus. Clone it to hand the same bus to
/// multiple [`LocalTransport`]s so they behave like independent nodes
/// talking over one broker, e.g. in a multi-node integration test.
#[derive(Clone, Default)]
pub struct LocalBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RawMessage>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A [`Transport`] backed by a [`LocalBus`] instead of a network connection.
pub struct LocalTransport {
    bus: LocalBus,
}

impl LocalTransport {
    pub fn new(bus: LocalBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, RawMessage>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus
            .subscribers
            .lock()
            .unwrap()
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let subscribers = self.bus.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get(subject) {
            let message = RawMessage {
                subject: subject.to_string(),
                payload,
            };
            for sender in senders {
                // A closed receiver (subscriber dropped) is not an error here:
                // NATS publishes to zero subscribers successfully too.
                let _ = sender.send(message.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = LocalBus::new();
        let a = LocalTransport::new(bus.clone());
        let b = LocalTransport::new(bus.clone());

        let mut sub1 = a.subscribe("MOL.INFO").await.unwrap();
        let mut sub2 = a.subscribe("MOL.INFO").await.unwrap();

        b.publish("MOL.INFO", b"hello".to_vec()).await.unwrap();

        assert_eq!(sub1.next().await.unwrap().payload, b"hello");
        assert_eq!(sub2.next().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn publish_to_unsubscribed_subject_is_a_noop() {
        let bus = LocalBus::new();
        let transport = LocalTransport::new(bus);
        transport.publish("MOL.DISCOVER", b"x".to_vec()).await.unwrap();
    }
}

//! The abstract pub/sub contract Transit is built against, plus two
//! concrete adapters: [`nats::NatsTransport`] (the reference backend) and
//! [`local::LocalTransport`] (an in-process loopback for tests and demos).

pub mod local;
pub mod nats;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;

/// A decoded-subject, still-encoded-payload message handed up from a
/// subscription stream.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// The only required transport semantic is publish/subscribe with subject
/// wildcarding: `MOL.INFO` receives broadcasts, `MOL.REQ.<id>` receives
/// targeted packets. Any pub/sub system with equivalent semantics can back
/// this trait; the reference backend is NATS (see [`nats::NatsTransport`]).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribes to `subject` and returns a stream of every message
    /// published to it from here on.
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, RawMessage>, TransportError>;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

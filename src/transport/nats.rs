//! The reference [`Transport`] backend: NATS via `async-nats`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_stream::StreamExt;

use crate::error::TransportError;

use super::{RawMessage, Transport};

/// A [`Transport`] over a NATS connection. `connect()` dials
/// `server_url`; `publish`/`subscribe` are thin wrappers translating
/// [`RawMessage`]s to and from `async_nats` messages.
pub struct NatsTransport {
    server_url: String,
    client: tokio::sync::RwLock<Option<async_nats::Client>>,
}

impl NatsTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client: tokio::sync::RwLock::new(None),
        }
    }

    async fn client(&self) -> Result<async_nats::Client, TransportError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(TransportError::Disconnected)
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let client = async_nats::connect(&self.server_url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(client) = self.client.write().await.take() {
            client
                .drain()
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, RawMessage>, TransportError> {
        let client = self.client().await?;
        let subscriber = client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let stream = subscriber.map(|message| RawMessage {
            subject: message.subject.to_string(),
            payload: message.payload.to_vec(),
        });
        Ok(Box::pin(stream))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client().await?;
        client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

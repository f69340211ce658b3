//! Registers a `math.add` action and calls it in-process, using
//! `LocalTransport` so the example runs without a NATS server.
//!
//! ```sh
//! cargo run --example local_call
//! ```

use std::sync::Arc;

use molecular_mesh::{ActionDef, ActionOutcome, Broker, LocalBus, LocalTransport, ServiceSchema};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bus = LocalBus::new();
    let broker = Broker::builder()
        .node_id("math-node")
        .transport(Arc::new(LocalTransport::new(bus)))
        .build();

    broker
        .register(ServiceSchema::new("math").action(ActionDef::new("add", |ctx: molecular_mesh::Context| async move {
            let a = ctx.params["a"].as_f64().unwrap_or(0.0);
            let b = ctx.params["b"].as_f64().unwrap_or(0.0);
            Ok(ActionOutcome::new(json!(a + b), ctx.meta))
        })))
        .await?;

    broker.start().await?;

    let sum = broker.call("math.add", json!({"a": 2, "b": 3})).await?;
    println!("2 + 3 = {sum}");

    broker.stop().await?;
    Ok(())
}

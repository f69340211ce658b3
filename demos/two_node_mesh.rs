//! Two brokers sharing a `LocalBus` stand in for two processes on a real
//! transporter: `greeter-node` serves `greeter.hello`, `caller-node`
//! discovers it and calls it remotely.
//!
//! ```sh
//! cargo run --example two_node_mesh
//! ```

use std::sync::Arc;
use std::time::Duration;

use molecular_mesh::{ActionDef, ActionOutcome, Broker, LocalBus, LocalTransport, ServiceSchema};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bus = LocalBus::new();

    let greeter = Broker::builder()
        .node_id("greeter-node")
        .transport(Arc::new(LocalTransport::new(bus.clone())))
        .build();
    greeter
        .register(ServiceSchema::new("greeter").action(ActionDef::new("hello", |ctx: molecular_mesh::Context| async move {
            let name = ctx.params["name"].as_str().unwrap_or("world").to_string();
            Ok(ActionOutcome::new(json!(format!("Hello, {name}!")), ctx.meta))
        })))
        .await?;
    greeter.start().await?;

    let caller = Broker::builder()
        .node_id("caller-node")
        .transport(Arc::new(LocalTransport::new(bus)))
        .build();
    caller.start().await?;

    caller.wait_for_services(&["greeter"], Duration::from_secs(5)).await?;

    let greeting = caller.call("greeter.hello", json!({"name": "mesh"})).await?;
    println!("{greeting}");

    caller.stop().await?;
    greeter.stop().await?;
    Ok(())
}

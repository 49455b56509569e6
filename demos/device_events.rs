//! Example: Subscribe to device events and print changes.

use kocom_wallpad::{ChangeKind, Gateway, GatewayConfig, GatewayEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::builder()
        .endpoint("192.168.0.200:8899".parse()?)
        .build();

    let gateway = Gateway::connect(config)?;
    let mut events = gateway.subscribe();

    println!("Listening for device events (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(GatewayEvent::DeviceChanged { state, kind: ChangeKind::New }) => {
                        println!("New {} {}: {:?}", state.platform, state.key, state.state);
                        if let Some(attribute) = &state.attribute {
                            println!("  attributes: {:?}", attribute);
                        }
                    }
                    Ok(GatewayEvent::DeviceChanged { state, kind: ChangeKind::Updated }) => {
                        println!("{} -> {:?}", state.key, state.state);
                    }
                    Ok(GatewayEvent::Connected) => println!("Bus connected"),
                    Ok(GatewayEvent::Disconnected) => println!("Bus disconnected, reconnecting..."),
                    Err(e) => {
                        println!("Event channel error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    gateway.stop().await;
    Ok(())
}

//! Example: Connect to a wallpad bus and print the devices seen on it.

use std::time::Duration;

use kocom_wallpad::{Gateway, GatewayConfig, Platform};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::builder()
        .endpoint("192.168.0.200:8899".parse()?)
        .build();

    println!("Connecting to wallpad bus...");
    let gateway = Gateway::connect(config)?;
    gateway.wait_connected().await?;

    // Devices only show up once the wallpad reports them
    println!("Connected. Listening for 10 seconds...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    for platform in Platform::ALL {
        let devices = gateway.all_by_platform(platform).await?;
        if devices.is_empty() {
            continue;
        }
        println!("\n--- {} ({}) ---", platform, devices.len());
        for device in &devices {
            println!(
                "  {:10} state={:?} token={}",
                device.key.unique_id(),
                device.state,
                device.replay_token().unwrap_or_default(),
            );
        }
    }

    println!("\nPress Ctrl+C to disconnect...");
    tokio::signal::ctrl_c().await?;
    gateway.stop().await;
    println!("Disconnected.");

    Ok(())
}

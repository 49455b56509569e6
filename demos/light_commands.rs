//! Example: Switch a light on and off and wait for the wallpad to confirm.

use std::time::Duration;

use kocom_wallpad::{Action, DeviceKey, DeviceType, Gateway, GatewayConfig, GatewayEvent, SubType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::builder()
        .endpoint("192.168.0.200:8899".parse()?)
        .build();

    let gateway = Gateway::connect(config)?;
    let mut events = gateway.subscribe();
    gateway.wait_connected().await?;

    // Light 0 in room 1 (the living room on most installations)
    let light = DeviceKey::new(DeviceType::Light, 1, 0, SubType::None);

    // A light command rewrites the whole room, so wait until the room has reported once
    println!("Waiting for room {} to report...", light.room_index);
    let learned = tokio::time::timeout(Duration::from_secs(30), async {
        while let Ok(event) = events.recv().await {
            if let GatewayEvent::DeviceChanged { state, .. } = event
                && state.key.device_type == light.device_type
                && state.key.room_index == light.room_index
            {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    if !learned {
        println!("No light traffic seen for room {}; commands may be refused", light.room_index);
    }

    println!("\nTurning {} on...", light);
    match gateway.send_action(light, Action::TurnOn).await {
        Ok(()) => println!("{} on (confirmed)", light),
        Err(e) => println!("Error turning {} on: {}", light, e),
    }

    tokio::time::sleep(Duration::from_secs(5)).await;

    println!("\nTurning {} off...", light);
    match gateway.send_action(light, Action::TurnOff).await {
        Ok(()) => println!("{} off (confirmed)", light),
        Err(e) => println!("Error turning {} off: {}", light, e),
    }

    gateway.stop().await;
    Ok(())
}

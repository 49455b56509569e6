// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway
//
//! # kocom-wallpad
//!
//! Gateway for the RS-485 bus of Kocom apartment wallpads: lights, outlets,
//! thermostats, ventilation, gas valve and elevator call.
//!
//! The bus is reached through a serial-to-TCP bridge or, with the `serial`
//! feature, a local RS-485 adapter. A background task owns the connection,
//! turns the byte stream into device states and confirms every command it
//! sends against the next matching state update.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kocom_wallpad::{Action, DeviceKey, DeviceType, Gateway, GatewayConfig, GatewayEvent, SubType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::builder()
//!         .endpoint("192.168.0.200:8899".parse()?)
//!         .build();
//!
//!     let gateway = Gateway::connect(config)?;
//!
//!     let mut events = gateway.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let GatewayEvent::DeviceChanged { state, kind } = event {
//!                 println!("{:?} {}: {:?}", kind, state.key, state.state);
//!             }
//!         }
//!     });
//!
//!     let outlet = DeviceKey::new(DeviceType::Outlet, 2, 0, SubType::None);
//!     gateway.send_action(outlet, Action::TurnOff).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     gateway.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
mod devices;
pub mod error;
pub mod event;
pub mod frame;
pub mod gateway;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-exports for convenience
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use error::{GatewayError, Result};
pub use event::{ChangeKind, EventReceiver, GatewayEvent};
pub use frame::{Checksum, FrameSynchronizer, PacketFrame};
pub use gateway::Gateway;
pub use model::{
    Attributes, ClimatePreset, ClimateState, DeviceKey, DeviceState, DeviceType,
    ElevatorDirection, FanState, HvacMode, Platform, StateValue, SubType, SwitchClass,
    VentilationPreset,
};
pub use protocol::{Action, ConfirmTimeouts, EncodedCommand, Expectation, PacketCodec};
pub use registry::{DeviceRegistry, Upsert};
pub use transport::{AnyConnection, Connection, Endpoint, TcpConnection};

// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use crate::model::DeviceState;

/// Why a device change event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First time this device facet is known to the gateway.
    New,
    /// State, attributes or platform changed.
    Updated,
}

/// All events that can be emitted by the gateway.
///
/// Users subscribe via `gateway.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<GatewayEvent>`.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Bus connection established (or re-established)
    Connected,
    /// Bus connection lost; the gateway is reconnecting
    Disconnected,
    /// A device was added or changed
    DeviceChanged { state: DeviceState, kind: ChangeKind },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<GatewayEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<GatewayEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

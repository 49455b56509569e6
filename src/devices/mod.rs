// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Per-family frame decoders and command encoders.
//!
//! Each supported device family registers one [`DeviceHandler`] in
//! [`HANDLERS`]; the codec dispatches on the device type resolved from the
//! frame's peer address.

mod elevator;
mod gasvalve;
mod switch;
mod thermostat;
mod ventilation;

use crate::constants::{CONTROLLER_CODE, CONTROLLER_ROOM, PAYLOAD_LEN};
use crate::error::{GatewayError, Result};
use crate::frame::PacketFrame;
use crate::model::{DeviceKey, DeviceState, DeviceType};
use crate::protocol::{Action, ConfirmTimeouts, Expectation};
use crate::registry::DeviceRegistry;

/// Addressing and body of an outbound frame, before framing and checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub dest: (u8, u8),
    pub src: (u8, u8),
    pub command: u8,
    pub data: [u8; PAYLOAD_LEN],
}

pub(crate) struct DeviceCommand {
    pub outbound: Outbound,
    pub expectation: Expectation,
}

/// Everything an encoder may look at.
pub(crate) struct EncodeContext<'a> {
    pub key: &'a DeviceKey,
    pub action: &'a Action,
    pub registry: &'a DeviceRegistry,
    /// Bus code of the target device family.
    pub code: u8,
    pub timeouts: &'a ConfirmTimeouts,
}

impl EncodeContext<'_> {
    /// Controller-to-device frame for the target room.
    fn to_device(&self, command: u8, data: [u8; PAYLOAD_LEN]) -> Outbound {
        Outbound {
            dest: (self.code, self.key.room_index),
            src: (CONTROLLER_CODE, CONTROLLER_ROOM),
            command,
            data,
        }
    }

    fn unsupported(&self) -> GatewayError {
        GatewayError::UnsupportedAction {
            key: *self.key,
            action: self.action.name().to_string(),
        }
    }

    /// Current state of the target, required for read-modify-write encoders.
    fn current(&self) -> Result<&DeviceState> {
        self.registry
            .get(self.key)
            .ok_or(GatewayError::MissingState(*self.key))
    }
}

pub(crate) type DecodeFn = fn(&PacketFrame, DeviceType, u8) -> Vec<DeviceState>;
pub(crate) type EncodeFn = fn(&EncodeContext<'_>) -> Result<DeviceCommand>;

pub(crate) struct DeviceHandler {
    pub device_type: DeviceType,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

pub(crate) const HANDLERS: [DeviceHandler; 6] = [
    DeviceHandler {
        device_type: DeviceType::Light,
        decode: switch::decode,
        encode: switch::encode,
    },
    DeviceHandler {
        device_type: DeviceType::Outlet,
        decode: switch::decode,
        encode: switch::encode,
    },
    DeviceHandler {
        device_type: DeviceType::Thermostat,
        decode: thermostat::decode,
        encode: thermostat::encode,
    },
    DeviceHandler {
        device_type: DeviceType::Ventilation,
        decode: ventilation::decode,
        encode: ventilation::encode,
    },
    DeviceHandler {
        device_type: DeviceType::GasValve,
        decode: gasvalve::decode,
        encode: gasvalve::encode,
    },
    DeviceHandler {
        device_type: DeviceType::Elevator,
        decode: elevator::decode,
        encode: elevator::encode,
    },
];

pub(crate) fn handler_for(device_type: DeviceType) -> Option<&'static DeviceHandler> {
    HANDLERS.iter().find(|h| h.device_type == device_type)
}

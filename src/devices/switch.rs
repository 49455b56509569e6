// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Eight-channel light and outlet rooms.

use crate::constants::{CHANNEL_COUNT, CHANNEL_OFF, CHANNEL_ON, CMD_STATE, PAYLOAD_LEN};
use crate::error::{GatewayError, Result};
use crate::frame::PacketFrame;
use crate::model::{
    Attributes, DeviceKey, DeviceState, DeviceType, Platform, StateValue, SubType, SwitchClass,
};
use crate::protocol::{Action, Expectation};

use super::{DeviceCommand, EncodeContext};

pub(super) fn decode(frame: &PacketFrame, device_type: DeviceType, room: u8) -> Vec<DeviceState> {
    if frame.command() != CMD_STATE {
        return Vec::new();
    }
    let platform = match device_type {
        DeviceType::Light => Platform::Light,
        _ => Platform::Switch,
    };

    frame
        .payload()
        .iter()
        .zip(0u8..)
        .map(|(byte, idx)| {
            let on = *byte == CHANNEL_ON;
            let key = DeviceKey::new(device_type, room, idx, SubType::None);
            let mut state = DeviceState::new(key, platform, StateValue::Binary(on));
            if device_type == DeviceType::Outlet {
                state = state.with_attribute(Attributes::Switch {
                    device_class: SwitchClass::Outlet,
                });
            }
            // Rooms report all eight slots; an off slot may not be wired at all.
            state.auto_register = on;
            state
        })
        .collect()
}

/// Rewrite one channel, carrying the other seven over from the room baseline.
pub(super) fn encode(ctx: &EncodeContext<'_>) -> Result<DeviceCommand> {
    let on = match ctx.action {
        Action::TurnOn => true,
        Action::TurnOff => false,
        _ => return Err(ctx.unsupported()),
    };
    let key = ctx.key;
    if usize::from(key.device_index) >= CHANNEL_COUNT {
        return Err(ctx.unsupported());
    }

    let baseline = ctx
        .registry
        .channels(key.device_type, key.room_index)
        .filter(|b| b.is_complete())
        .ok_or(GatewayError::MissingChannelBaseline {
            device_type: key.device_type,
            room_index: key.room_index,
        })?;

    let mut data = [CHANNEL_OFF; PAYLOAD_LEN];
    for (byte, idx) in data.iter_mut().zip(0u8..) {
        let lit = if idx == key.device_index {
            on
        } else {
            baseline.is_on(idx)
        };
        if lit {
            *byte = CHANNEL_ON;
        }
    }

    let expectation = Expectation::new(*key, ctx.timeouts.default, move |s| {
        matches!(s.state, StateValue::Binary(v) if v == on)
    });
    Ok(DeviceCommand {
        outbound: ctx.to_device(CMD_STATE, data),
        expectation,
    })
}

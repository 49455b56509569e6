// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Gas valve. It can be closed remotely but never opened.

use crate::constants::{CMD_CLOSE, CMD_OPEN, PAYLOAD_LEN};
use crate::error::Result;
use crate::frame::PacketFrame;
use crate::model::{DeviceKey, DeviceState, DeviceType, Platform, StateValue, SubType};
use crate::protocol::{Action, Expectation};

use super::{DeviceCommand, EncodeContext};

pub(super) fn decode(frame: &PacketFrame, device_type: DeviceType, room: u8) -> Vec<DeviceState> {
    let open = match frame.command() {
        CMD_OPEN => true,
        CMD_CLOSE => false,
        _ => return Vec::new(),
    };
    let key = DeviceKey::new(device_type, room, 0, SubType::None);
    vec![DeviceState::new(key, Platform::Switch, StateValue::Binary(open))]
}

pub(super) fn encode(ctx: &EncodeContext<'_>) -> Result<DeviceCommand> {
    if *ctx.action != Action::TurnOff {
        return Err(ctx.unsupported());
    }
    let expectation = Expectation::new(*ctx.key, ctx.timeouts.gas_valve, |s| !s.state.is_on());
    Ok(DeviceCommand {
        outbound: ctx.to_device(CMD_CLOSE, [0u8; PAYLOAD_LEN]),
        expectation,
    })
}

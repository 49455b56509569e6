// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Heat-recovery ventilation unit.

use crate::constants::{CMD_STATE, PAYLOAD_LEN, VENTILATION_SPEEDS};
use crate::error::Result;
use crate::frame::PacketFrame;
use crate::model::{
    Attributes, DeviceKey, DeviceState, DeviceType, FanState, Platform, StateValue, SubType,
    VentilationPreset,
};
use crate::protocol::{Action, Expectation};

use super::{DeviceCommand, EncodeContext};

const POWER_ON: u8 = 0x11;
const POWER_OFF: u8 = 0x00;

pub(super) fn decode(frame: &PacketFrame, device_type: DeviceType, room: u8) -> Vec<DeviceState> {
    if frame.command() != CMD_STATE {
        return Vec::new();
    }
    let payload = frame.payload();
    let fan = FanState {
        on: payload[0] >> 4 == 0x01,
        preset_mode: VentilationPreset::from_code(payload[1]),
        speed: payload[2],
    };

    // Plain ventilation is the base mode, not a preset the host can pick.
    let preset_modes = match fan.preset_mode {
        VentilationPreset::Unknown | VentilationPreset::Ventilation => Vec::new(),
        other => vec![other],
    };
    let key = DeviceKey::new(device_type, room, 0, SubType::None);
    let state = DeviceState::new(key, Platform::Fan, StateValue::Fan(fan)).with_attribute(
        Attributes::Fan {
            feature_preset: !preset_modes.is_empty(),
            preset_modes,
            speed_list: VENTILATION_SPEEDS.to_vec(),
        },
    );
    vec![state]
}

pub(super) fn encode(ctx: &EncodeContext<'_>) -> Result<DeviceCommand> {
    let mut target = *ctx
        .current()?
        .state
        .as_fan()
        .ok_or_else(|| ctx.unsupported())?;

    match *ctx.action {
        Action::TurnOn => {
            target.on = true;
            if !VENTILATION_SPEEDS.contains(&target.speed) {
                target.speed = VENTILATION_SPEEDS[0];
            }
        }
        Action::TurnOff => target.on = false,
        Action::SetVentilationPreset(preset) if preset.code().is_some() => {
            target.on = true;
            target.preset_mode = preset;
        }
        Action::SetSpeed(0) => target.on = false,
        Action::SetSpeed(speed) if VENTILATION_SPEEDS.contains(&speed) => {
            target.on = true;
            target.speed = speed;
        }
        _ => return Err(ctx.unsupported()),
    }

    let mut data = [0u8; PAYLOAD_LEN];
    data[0] = if target.on { POWER_ON } else { POWER_OFF };
    data[1] = target
        .preset_mode
        .code()
        .or(VentilationPreset::Ventilation.code())
        .unwrap_or_default();
    data[2] = if target.on { target.speed } else { 0 };

    let action = *ctx.action;
    let expectation = Expectation::new(*ctx.key, ctx.timeouts.default, move |s| {
        let Some(f) = s.state.as_fan() else {
            return false;
        };
        match action {
            Action::SetVentilationPreset(_) => f.preset_mode == target.preset_mode,
            Action::SetSpeed(speed) if speed != 0 => f.speed == speed,
            _ => f.on == target.on,
        }
    });
    Ok(DeviceCommand {
        outbound: ctx.to_device(CMD_STATE, data),
        expectation,
    })
}

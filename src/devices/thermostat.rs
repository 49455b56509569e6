// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Room heating thermostats.
//!
//! Payload layout: byte 0 high nibble is the heating flag, byte 1 low nibble
//! the away preset, byte 2 the target and byte 4 the current temperature in
//! whole degrees Celsius.

use crate::constants::{CMD_STATE, PAYLOAD_LEN};
use crate::error::Result;
use crate::frame::PacketFrame;
use crate::model::{
    Attributes, ClimatePreset, ClimateState, DeviceKey, DeviceState, DeviceType, HvacMode,
    Platform, StateValue, SubType,
};
use crate::protocol::{Action, Expectation};

use super::{DeviceCommand, EncodeContext};

const HEAT_ON: u8 = 0x11;
const HEAT_OFF: u8 = 0x01;
const AWAY_ON: u8 = 0x01;
const AWAY_OFF: u8 = 0x00;
const MIN_TARGET: f32 = 5.0;
const MAX_TARGET: f32 = 40.0;
/// Targets travel as whole degrees.
const TEMP_STEP: f32 = 1.0;

pub(super) fn decode(frame: &PacketFrame, device_type: DeviceType, room: u8) -> Vec<DeviceState> {
    if frame.command() != CMD_STATE {
        return Vec::new();
    }
    let payload = frame.payload();
    let climate = ClimateState {
        hvac_mode: if payload[0] >> 4 == 0x01 {
            HvacMode::Heat
        } else {
            HvacMode::Off
        },
        preset_mode: if payload[1] & 0x0F == 0x01 {
            ClimatePreset::Away
        } else {
            ClimatePreset::None
        },
        target_temp: f32::from(payload[2]),
        current_temp: f32::from(payload[4]),
    };
    let key = DeviceKey::new(device_type, room, 0, SubType::None);
    let state = DeviceState::new(key, Platform::Climate, StateValue::Climate(climate)).with_attribute(
        Attributes::Climate {
            hvac_modes: vec![HvacMode::Heat, HvacMode::Off],
            feature_preset: true,
            preset_modes: vec![ClimatePreset::Away, ClimatePreset::None],
            temp_step: TEMP_STEP,
        },
    );
    vec![state]
}

/// Apply one change on top of the last reported state and resend all of it.
pub(super) fn encode(ctx: &EncodeContext<'_>) -> Result<DeviceCommand> {
    let mut target = *ctx
        .current()?
        .state
        .as_climate()
        .ok_or_else(|| ctx.unsupported())?;

    match *ctx.action {
        Action::TurnOn => target.hvac_mode = HvacMode::Heat,
        Action::TurnOff => target.hvac_mode = HvacMode::Off,
        Action::SetHvacMode(mode) => target.hvac_mode = mode,
        Action::SetClimatePreset(preset) => target.preset_mode = preset,
        Action::SetTemperature(temp) if temp.is_finite() => {
            target.target_temp = temp.round().clamp(MIN_TARGET, MAX_TARGET);
        }
        _ => return Err(ctx.unsupported()),
    }

    let mut data = [0u8; PAYLOAD_LEN];
    data[0] = match target.hvac_mode {
        HvacMode::Heat => HEAT_ON,
        HvacMode::Off => HEAT_OFF,
    };
    data[1] = match target.preset_mode {
        ClimatePreset::Away => AWAY_ON,
        ClimatePreset::None => AWAY_OFF,
    };
    // Clamped to MIN_TARGET..=MAX_TARGET above or decoded from a byte.
    data[2] = target.target_temp as u8;

    let action = *ctx.action;
    let expectation = Expectation::new(*ctx.key, ctx.timeouts.default, move |s| {
        let Some(c) = s.state.as_climate() else {
            return false;
        };
        match action {
            Action::TurnOn | Action::TurnOff | Action::SetHvacMode(_) => {
                c.hvac_mode == target.hvac_mode
            }
            Action::SetClimatePreset(_) => c.preset_mode == target.preset_mode,
            _ => c.target_temp == target.target_temp,
        }
    });
    Ok(DeviceCommand {
        outbound: ctx.to_device(CMD_STATE, data),
        expectation,
    })
}

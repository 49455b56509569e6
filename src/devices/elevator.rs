// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Elevator call button and direction sensor.
//!
//! One frame yields two facets: a switch that is on while a car is called or
//! moving, and a sensor that reports where the car is heading.

use crate::constants::{
    CMD_CALL, CONTROLLER_CODE, CONTROLLER_ROOM, PACKET_TYPE_CALL, PAYLOAD_LEN,
};
use crate::error::Result;
use crate::frame::PacketFrame;
use crate::model::{
    DeviceKey, DeviceState, DeviceType, ElevatorDirection, Platform, StateValue, SubType,
};
use crate::protocol::{Action, Expectation};

use super::{DeviceCommand, EncodeContext, Outbound};

pub(super) fn decode(frame: &PacketFrame, device_type: DeviceType, room: u8) -> Vec<DeviceState> {
    let code = frame.payload()[0];
    let called = frame.packet_type() == PACKET_TYPE_CALL;

    let active = match code {
        0x03 => false,
        0x01 | 0x02 => true,
        _ => called,
    };
    let direction = if called {
        ElevatorDirection::Called
    } else {
        ElevatorDirection::from_code(code)
    };

    vec![
        DeviceState::new(
            DeviceKey::new(device_type, room, 0, SubType::None),
            Platform::Switch,
            StateValue::Binary(active),
        ),
        DeviceState::new(
            DeviceKey::new(device_type, room, 0, SubType::Direction),
            Platform::Sensor,
            StateValue::Direction(direction),
        ),
    ]
}

/// Call a car to the floor. The call is sent as if from the elevator to the
/// controller, which is how the wallpad itself relays it.
pub(super) fn encode(ctx: &EncodeContext<'_>) -> Result<DeviceCommand> {
    if *ctx.action != Action::TurnOn {
        return Err(ctx.unsupported());
    }
    let outbound = Outbound {
        dest: (CONTROLLER_CODE, CONTROLLER_ROOM),
        src: (ctx.code, ctx.key.room_index),
        command: CMD_CALL,
        data: [0u8; PAYLOAD_LEN],
    };
    let switch_key = DeviceKey {
        sub_type: SubType::None,
        ..*ctx.key
    };
    let expectation = Expectation::new(switch_key, ctx.timeouts.default, |s| s.state.is_on());
    Ok(DeviceCommand {
        outbound,
        expectation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testutil::frame_from;
    use crate::error::GatewayError;
    use crate::protocol::ConfirmTimeouts;
    use crate::registry::DeviceRegistry;

    fn run(sub_type: SubType, action: Action) -> Result<DeviceCommand> {
        let key = DeviceKey::new(DeviceType::Elevator, 7, 0, sub_type);
        let timeouts = ConfirmTimeouts::default();
        encode(&EncodeContext {
            key: &key,
            action: &action,
            registry: &DeviceRegistry::new(),
            code: 0x44,
            timeouts: &timeouts,
        })
    }

    #[test]
    fn test_call_ack_is_active_and_called() {
        let states = decode(&frame_from(0x44, 7, 0xDC, 0x01, [0; 8]), DeviceType::Elevator, 7);
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].state, StateValue::Binary(true));
        assert_eq!(states[1].key.sub_type, SubType::Direction);
        assert_eq!(states[1].platform, Platform::Sensor);
        assert_eq!(
            states[1].state,
            StateValue::Direction(ElevatorDirection::Called)
        );
    }

    #[test]
    fn test_arrival_is_inactive() {
        let states = decode(
            &frame_from(0x44, 7, 0xBC, 0x00, [0x03, 0, 0, 0, 0, 0, 0, 0]),
            DeviceType::Elevator,
            7,
        );
        assert_eq!(states[0].state, StateValue::Binary(false));
        assert_eq!(
            states[1].state,
            StateValue::Direction(ElevatorDirection::Arrival)
        );
    }

    #[test]
    fn test_moving_up() {
        let states = decode(
            &frame_from(0x44, 7, 0xBC, 0x00, [0x02, 0, 0, 0, 0, 0, 0, 0]),
            DeviceType::Elevator,
            7,
        );
        assert_eq!(states[0].state, StateValue::Binary(true));
        assert_eq!(
            states[1].state,
            StateValue::Direction(ElevatorDirection::Upward)
        );
    }

    #[test]
    fn test_call_frame_addressing() {
        let cmd = run(SubType::Direction, Action::TurnOn).unwrap();
        assert_eq!(cmd.outbound.dest, (0x01, 0x00));
        assert_eq!(cmd.outbound.src, (0x44, 7));
        assert_eq!(cmd.outbound.command, 0x01);
        assert_eq!(cmd.expectation.key.sub_type, SubType::None);
    }

    #[test]
    fn test_cancel_refused() {
        assert!(matches!(
            run(SubType::None, Action::TurnOff),
            Err(GatewayError::UnsupportedAction { .. })
        ));
    }
}

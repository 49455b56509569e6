// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::time::Duration;

use crate::model::DeviceType;

/// Protocol framing bytes.
pub const PACKET_PREFIX: [u8; 2] = [0xAA, 0x55];
pub const PACKET_SUFFIX: [u8; 2] = [0x0D, 0x0D];
/// Every frame on the bus is exactly this long, prefix and suffix included.
pub const PACKET_LEN: usize = 21;

/// Byte offsets inside a frame.
pub const TYPE_OFFSET: usize = 3;
pub const DEST_OFFSET: usize = 5;
pub const SRC_OFFSET: usize = 7;
pub const COMMAND_OFFSET: usize = 9;
pub const PAYLOAD_OFFSET: usize = 10;
pub const PAYLOAD_LEN: usize = 8;
pub const CHECKSUM_OFFSET: usize = 18;
/// Checksummed region: everything between the prefix and the checksum byte.
pub const CHECKSUM_RANGE: std::ops::Range<usize> = 2..CHECKSUM_OFFSET;

/// The wallpad controller's own reserved device code.
pub const CONTROLLER_CODE: u8 = 0x01;
pub const CONTROLLER_ROOM: u8 = 0x00;

/// Fixed type bytes (`30 BC`) and padding used on every outbound frame.
pub const OUTBOUND_TYPE: [u8; 2] = [0x30, 0xBC];
pub const OUTBOUND_PAD: u8 = 0x00;

/// Packet type nibble carried by an elevator call frame.
pub const PACKET_TYPE_CALL: u8 = 0x0D;

/// Command bytes.
pub const CMD_STATE: u8 = 0x00;
pub const CMD_OPEN: u8 = 0x01;
pub const CMD_CLOSE: u8 = 0x02;
pub const CMD_CALL: u8 = 0x01;

/// Channel byte for a switched-on light/outlet channel.
pub const CHANNEL_ON: u8 = 0xFF;
pub const CHANNEL_OFF: u8 = 0x00;
pub const CHANNEL_COUNT: usize = 8;

/// Bus device code ↔ device type table.
pub const DEVICE_CODES: [(u8, DeviceType); 6] = [
    (0x0E, DeviceType::Light),
    (0x3B, DeviceType::Outlet),
    (0x36, DeviceType::Thermostat),
    (0x48, DeviceType::Ventilation),
    (0x2C, DeviceType::GasValve),
    (0x44, DeviceType::Elevator),
];

/// Look up the device type for a bus device code.
pub fn device_type_for_code(code: u8) -> DeviceType {
    DEVICE_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(DeviceType::Unknown, |(_, dt)| *dt)
}

/// Inverse of [`device_type_for_code`]; `None` for types that never appear on the bus.
pub fn code_for_device_type(device_type: DeviceType) -> Option<u8> {
    DEVICE_CODES
        .iter()
        .find(|(_, dt)| *dt == device_type)
        .map(|(c, _)| *c)
}

/// Ventilation speed levels as carried in payload byte 2.
pub const VENTILATION_SPEEDS: [u8; 3] = [0x40, 0x80, 0xC0];

// Gateway timing defaults.
pub const DEFAULT_TCP_PORT: u16 = 8899;
pub const DEFAULT_SERIAL_BAUD: u32 = 9600;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_RECV_CHUNK: usize = 512;
pub const DEFAULT_RECV_POLL: Duration = Duration::from_millis(50);
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(200);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(10);
pub const DEFAULT_IDLE_WAIT_BUDGET: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_GAP: Duration = Duration::from_millis(500);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);
/// Gas valves actuate mechanically and report back slower than relays.
pub const DEFAULT_GASVALVE_CONFIRM_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_table() {
        assert_eq!(device_type_for_code(0x0E), DeviceType::Light);
        assert_eq!(device_type_for_code(0x3B), DeviceType::Outlet);
        assert_eq!(device_type_for_code(0x44), DeviceType::Elevator);
        assert_eq!(device_type_for_code(0x99), DeviceType::Unknown);
    }

    #[test]
    fn test_code_table_inverse() {
        for (code, dt) in DEVICE_CODES {
            assert_eq!(code_for_device_type(dt), Some(code));
            assert_eq!(device_type_for_code(code), dt);
        }
        assert_eq!(code_for_device_type(DeviceType::Motion), None);
        assert_eq!(code_for_device_type(DeviceType::Unknown), None);
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(PAYLOAD_OFFSET + PAYLOAD_LEN, CHECKSUM_OFFSET);
        assert_eq!(CHECKSUM_OFFSET + 1 + PACKET_SUFFIX.len(), PACKET_LEN);
    }
}

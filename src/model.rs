// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::constants::PACKET_LEN;
use crate::error::GatewayError;

/// Logical device families known to the wallpad.
///
/// Only some of them have a bus code (see [`crate::constants::DEVICE_CODES`]);
/// the rest exist so keys stay stable if decoders for them are added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceType {
    Unknown = 0,
    Light = 1,
    LightCutoff = 2,
    DimmingLight = 3,
    Outlet = 4,
    Thermostat = 5,
    AirConditioner = 6,
    Ventilation = 7,
    GasValve = 8,
    Elevator = 9,
    Motion = 10,
    AirQuality = 11,
}

impl DeviceType {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            1 => Some(Self::Light),
            2 => Some(Self::LightCutoff),
            3 => Some(Self::DimmingLight),
            4 => Some(Self::Outlet),
            5 => Some(Self::Thermostat),
            6 => Some(Self::AirConditioner),
            7 => Some(Self::Ventilation),
            8 => Some(Self::GasValve),
            9 => Some(Self::Elevator),
            10 => Some(Self::Motion),
            11 => Some(Self::AirQuality),
            _ => None,
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// The platform a device of this type is rendered as by default.
    pub fn default_platform(&self) -> Option<Platform> {
        match self {
            Self::Light | Self::LightCutoff | Self::DimmingLight => Some(Platform::Light),
            Self::Outlet | Self::GasValve | Self::Elevator => Some(Platform::Switch),
            Self::Thermostat | Self::AirConditioner => Some(Platform::Climate),
            Self::Ventilation => Some(Platform::Fan),
            Self::Motion => Some(Platform::BinarySensor),
            Self::AirQuality => Some(Platform::Sensor),
            Self::Unknown => None,
        }
    }

    /// Whether one bus frame carries all eight channels of a room.
    pub fn is_multi_channel(&self) -> bool {
        matches!(self, Self::Light | Self::Outlet)
    }
}

/// Facet of a physical device that exposes more than one logical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubType {
    None = 0,
    Direction = 1,
}

impl SubType {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Direction),
            _ => None,
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Capability category the host needs to render a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Switch,
    Light,
    Climate,
    Fan,
    Sensor,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::BinarySensor,
        Platform::Switch,
        Platform::Light,
        Platform::Climate,
        Platform::Fan,
        Platform::Sensor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinarySensor => "binary_sensor",
            Self::Switch => "switch",
            Self::Light => "light",
            Self::Climate => "climate",
            Self::Fan => "fan",
            Self::Sensor => "sensor",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one logical device facet on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceKey {
    pub device_type: DeviceType,
    pub room_index: u8,
    pub device_index: u8,
    pub sub_type: SubType,
}

impl DeviceKey {
    pub fn new(device_type: DeviceType, room_index: u8, device_index: u8, sub_type: SubType) -> Self {
        Self {
            device_type,
            room_index,
            device_index,
            sub_type,
        }
    }

    /// Stable external identity, e.g. `1-3_0-0` for light 0 in room 3.
    pub fn unique_id(&self) -> String {
        format!(
            "{}-{}_{}-{}",
            self.device_type.value(),
            self.room_index,
            self.device_index,
            self.sub_type.value()
        )
    }

    /// Same device family and room, different channel.
    pub fn with_device_index(&self, device_index: u8) -> Self {
        Self {
            device_index,
            ..*self
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_id())
    }
}

impl FromStr for DeviceKey {
    type Err = GatewayError;

    /// Parse a key back from its [`unique_id`](DeviceKey::unique_id).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GatewayError::InvalidReplay {
            details: format!("malformed device key: {s}"),
        };
        let (dt, rest) = s.split_once('-').ok_or_else(invalid)?;
        let (room, rest) = rest.split_once('_').ok_or_else(invalid)?;
        let (idx, sub) = rest.split_once('-').ok_or_else(invalid)?;

        let device_type = dt
            .parse::<u8>()
            .ok()
            .and_then(DeviceType::from_value)
            .ok_or_else(invalid)?;
        let sub_type = sub
            .parse::<u8>()
            .ok()
            .and_then(SubType::from_value)
            .ok_or_else(invalid)?;
        let room_index = room.parse::<u8>().map_err(|_| invalid())?;
        let device_index = idx.parse::<u8>().map_err(|_| invalid())?;

        Ok(Self::new(device_type, room_index, device_index, sub_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Heat,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimatePreset {
    Away,
    None,
}

/// Ventilation preset as carried in payload byte 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VentilationPreset {
    Ventilation,
    Auto,
    Bypass,
    Sleep,
    AirPurification,
    Unknown,
}

impl VentilationPreset {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Ventilation,
            0x02 => Self::Auto,
            0x03 => Self::Bypass,
            0x05 => Self::Sleep,
            0x08 => Self::AirPurification,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> Option<u8> {
        match self {
            Self::Ventilation => Some(0x01),
            Self::Auto => Some(0x02),
            Self::Bypass => Some(0x03),
            Self::Sleep => Some(0x05),
            Self::AirPurification => Some(0x08),
            Self::Unknown => None,
        }
    }
}

/// What the elevator direction sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevatorDirection {
    Called,
    Idle,
    Downward,
    Upward,
    Arrival,
    Unknown,
}

impl ElevatorDirection {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Idle,
            0x01 => Self::Downward,
            0x02 => Self::Upward,
            0x03 => Self::Arrival,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Called => "called",
            Self::Idle => "idle",
            Self::Downward => "downward",
            Self::Upward => "upward",
            Self::Arrival => "arrival",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateState {
    pub hvac_mode: HvacMode,
    pub preset_mode: ClimatePreset,
    pub target_temp: f32,
    pub current_temp: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FanState {
    #[serde(rename = "state")]
    pub on: bool,
    pub preset_mode: VentilationPreset,
    pub speed: u8,
}

/// Mutable part of a device state. Its shape follows the platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Binary(bool),
    Climate(ClimateState),
    Fan(FanState),
    Direction(ElevatorDirection),
}

impl StateValue {
    /// Truthiness used by on/off confirmations.
    pub fn is_on(&self) -> bool {
        match self {
            Self::Binary(on) => *on,
            Self::Climate(c) => c.hvac_mode == HvacMode::Heat,
            Self::Fan(f) => f.on,
            Self::Direction(d) => !matches!(d, ElevatorDirection::Idle | ElevatorDirection::Unknown),
        }
    }

    pub fn as_climate(&self) -> Option<&ClimateState> {
        match self {
            Self::Climate(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_fan(&self) -> Option<&FanState> {
        match self {
            Self::Fan(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchClass {
    Outlet,
    Switch,
}

/// Static per-device metadata, kept apart from the mutable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Attributes {
    Switch {
        device_class: SwitchClass,
    },
    Climate {
        hvac_modes: Vec<HvacMode>,
        feature_preset: bool,
        preset_modes: Vec<ClimatePreset>,
        temp_step: f32,
    },
    Fan {
        feature_preset: bool,
        preset_modes: Vec<VentilationPreset>,
        speed_list: Vec<u8>,
    },
}

/// Decoded state of one device facet at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub key: DeviceKey,
    pub platform: Platform,
    pub state: StateValue,
    pub attribute: Option<Attributes>,
    /// Frame this state was decoded from; the replay token.
    #[serde(skip)]
    pub packet: Option<[u8; PACKET_LEN]>,
    /// Whether the decoder considers this state strong enough to create a
    /// new registry entry on its own.
    #[serde(skip)]
    pub auto_register: bool,
}

impl DeviceState {
    pub fn new(key: DeviceKey, platform: Platform, state: StateValue) -> Self {
        Self {
            key,
            platform,
            state,
            attribute: None,
            packet: None,
            auto_register: true,
        }
    }

    pub fn with_attribute(mut self, attribute: Attributes) -> Self {
        self.attribute = Some(attribute);
        self
    }

    /// Hex encoding of the source frame, suitable for persisting and
    /// handing back to [`crate::Gateway::replay`].
    pub fn replay_token(&self) -> Option<String> {
        self.packet.map(hex::encode)
    }

    /// Whether anything the host can observe differs from `other`.
    pub fn differs_from(&self, other: &DeviceState) -> bool {
        self.platform != other.platform
            || self.state != other.state
            || self.attribute != other.attribute
    }
}

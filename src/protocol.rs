// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{
    CHECKSUM_OFFSET, CHECKSUM_RANGE, COMMAND_OFFSET, DEFAULT_CONFIRM_TIMEOUT,
    DEFAULT_GASVALVE_CONFIRM_TIMEOUT, DEST_OFFSET, OUTBOUND_PAD, OUTBOUND_TYPE, PACKET_LEN,
    PACKET_PREFIX, PACKET_SUFFIX, PAYLOAD_OFFSET, SRC_OFFSET, code_for_device_type,
    device_type_for_code,
};
use crate::devices::{self, EncodeContext, Outbound};
use crate::error::{GatewayError, Result};
use crate::frame::{Checksum, PacketFrame};
use crate::model::{ClimatePreset, DeviceKey, DeviceState, HvacMode, VentilationPreset};
use crate::registry::DeviceRegistry;

/// A user intent against one device facet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    TurnOn,
    TurnOff,
    SetHvacMode(HvacMode),
    SetClimatePreset(ClimatePreset),
    SetTemperature(f32),
    SetVentilationPreset(VentilationPreset),
    /// One of the ventilation speed levels, or 0 to stop.
    SetSpeed(u8),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::SetHvacMode(_) => "set_hvac_mode",
            Self::SetClimatePreset(_) => "set_preset",
            Self::SetTemperature(_) => "set_temperature",
            Self::SetVentilationPreset(_) => "set_preset",
            Self::SetSpeed(_) => "set_speed",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Predicate = Arc<dyn Fn(&DeviceState) -> bool + Send + Sync>;

/// What a state update must look like to confirm a sent command.
#[derive(Clone)]
pub struct Expectation {
    pub key: DeviceKey,
    pub timeout: Duration,
    predicate: Predicate,
}

impl Expectation {
    pub fn new<F>(key: DeviceKey, timeout: Duration, predicate: F) -> Self
    where
        F: Fn(&DeviceState) -> bool + Send + Sync + 'static,
    {
        Self {
            key,
            timeout,
            predicate: Arc::new(predicate),
        }
    }

    /// Whether `state` confirms the command. A panicking predicate counts as no match.
    pub fn matches(&self, state: &DeviceState) -> bool {
        if state.key != self.key {
            return false;
        }
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(state))) {
            Ok(matched) => matched,
            Err(_) => {
                warn!("Confirmation predicate for {} panicked", self.key);
                false
            }
        }
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A ready-to-send frame plus the update that confirms it.
#[derive(Debug, Clone)]
pub struct EncodedCommand {
    pub frame: PacketFrame,
    pub expectation: Expectation,
}

/// How long to wait for a confirming update after each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmTimeouts {
    pub default: Duration,
    pub gas_valve: Duration,
}

impl Default for ConfirmTimeouts {
    fn default() -> Self {
        Self {
            default: DEFAULT_CONFIRM_TIMEOUT,
            gas_valve: DEFAULT_GASVALVE_CONFIRM_TIMEOUT,
        }
    }
}

/// Translates between validated frames and device states.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    checksum: Checksum,
    timeouts: ConfirmTimeouts,
}

impl PacketCodec {
    pub fn new(checksum: Checksum, timeouts: ConfirmTimeouts) -> Self {
        Self { checksum, timeouts }
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Decode a frame into zero or more device states.
    ///
    /// Frames with a bad checksum, an unattributable peer or an unhandled
    /// device code decode to nothing. Every returned state carries the frame
    /// as its replay token.
    pub fn decode(&self, frame: &PacketFrame) -> Vec<DeviceState> {
        if !self.checksum.verify(frame) {
            debug!("Packet checksum is invalid: {}", frame.to_hex());
            return Vec::new();
        }
        let Some((code, room)) = frame.peer() else {
            warn!(
                "Peer resolution failed: dest={:02x?}, src={:02x?}",
                frame.dest(),
                frame.src()
            );
            return Vec::new();
        };
        let device_type = device_type_for_code(code);
        let Some(handler) = devices::handler_for(device_type) else {
            debug!("Unhandled device code 0x{:02x}: {}", code, frame.to_hex());
            return Vec::new();
        };

        let mut states = (handler.decode)(frame, device_type, room);
        for state in &mut states {
            state.packet = Some(*frame.raw());
        }
        states
    }

    /// Build the frame for `action` on `key`, together with its confirmation.
    ///
    /// Partial commands are filled in from `registry`; a command that cannot
    /// be built without guessing is refused.
    pub fn encode(
        &self,
        key: &DeviceKey,
        action: &Action,
        registry: &DeviceRegistry,
    ) -> Result<EncodedCommand> {
        let unsupported = || GatewayError::UnsupportedDevice(key.device_type);
        let code = code_for_device_type(key.device_type).ok_or_else(unsupported)?;
        let handler = devices::handler_for(key.device_type).ok_or_else(unsupported)?;

        let ctx = EncodeContext {
            key,
            action,
            registry,
            code,
            timeouts: &self.timeouts,
        };
        let command = (handler.encode)(&ctx)?;
        let frame = self.build_frame(&command.outbound);
        debug!("Encoded {} for {}: {}", action, key, frame.to_hex());

        Ok(EncodedCommand {
            frame,
            expectation: command.expectation,
        })
    }

    fn build_frame(&self, outbound: &Outbound) -> PacketFrame {
        let mut raw = [0u8; PACKET_LEN];
        raw[..2].copy_from_slice(&PACKET_PREFIX);
        raw[2..4].copy_from_slice(&OUTBOUND_TYPE);
        raw[4] = OUTBOUND_PAD;
        raw[DEST_OFFSET] = outbound.dest.0;
        raw[DEST_OFFSET + 1] = outbound.dest.1;
        raw[SRC_OFFSET] = outbound.src.0;
        raw[SRC_OFFSET + 1] = outbound.src.1;
        raw[COMMAND_OFFSET] = outbound.command;
        raw[PAYLOAD_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&outbound.data);
        raw[CHECKSUM_OFFSET] = self.checksum.compute(&raw[CHECKSUM_RANGE]);
        raw[PACKET_LEN - 2..].copy_from_slice(&PACKET_SUFFIX);
        PacketFrame::from_raw(raw)
    }
}

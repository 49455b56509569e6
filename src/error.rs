// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use crate::model::{DeviceKey, DeviceType};

/// All errors that can occur in the kocom-wallpad library.
///
/// Framing noise, checksum mismatches and unknown device codes never show
/// up here: those frames are logged and dropped inside the receive loop.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Connection is down")]
    Disconnected,

    #[error("Unsupported device type for outbound command: {0:?}")]
    UnsupportedDevice(DeviceType),

    #[error("Action {action} is not supported by {key}")]
    UnsupportedAction { key: DeviceKey, action: String },

    #[error("No channel baseline known for {device_type:?} room {room_index}")]
    MissingChannelBaseline {
        device_type: DeviceType,
        room_index: u8,
    },

    #[error("No known state for {0}; cannot build a partial command")]
    MissingState(DeviceKey),

    #[error("No confirmation for {action} on {key} after {attempts} attempts")]
    ConfirmationTimeout {
        key: DeviceKey,
        action: String,
        attempts: u32,
    },

    #[error("Invalid replay token: {details}")]
    InvalidReplay { details: String },

    #[error("Invalid endpoint: {details}")]
    InvalidEndpoint { details: String },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Gateway stopped")]
    GatewayStopped,
}

impl GatewayError {
    /// Whether this error is transient and the action may succeed if retried later.
    ///
    /// Encoding errors are permanent: the frame was never sent and sending it
    /// again would fail the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Io(_)
                | GatewayError::ConnectTimeout
                | GatewayError::Disconnected
                | GatewayError::ConfirmationTimeout { .. }
                | GatewayError::MissingChannelBaseline { .. }
                | GatewayError::MissingState(_)
                | GatewayError::ChannelClosed
        )
    }

    /// Whether this error was raised while building the outbound frame.
    pub fn is_encoding_error(&self) -> bool {
        matches!(
            self,
            GatewayError::UnsupportedDevice(_)
                | GatewayError::UnsupportedAction { .. }
                | GatewayError::MissingChannelBaseline { .. }
                | GatewayError::MissingState(_)
        )
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::GatewayStopped
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for GatewayError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        GatewayError::ChannelClosed
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use kocom_wallpad::{
    Action, Attributes, ChangeKind, Checksum, ClimatePreset, DeviceKey, DeviceState, DeviceType,
    Endpoint, Gateway, GatewayConfig, GatewayEvent, HvacMode, Platform, StateValue,
    VentilationPreset,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "kocom2mqtt")]
#[command(about = "Bridge between a Kocom wallpad RS-485 bus and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    gateway: GatewayToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct GatewayToml {
    /// Bridge host name or address, or a serial device path such as `/dev/ttyUSB0`.
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    /// "sum" or "twos_complement"
    #[serde(default = "default_checksum")]
    checksum: String,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_min")]
    reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_max")]
    reconnect_max_ms: u64,
    #[serde(default = "default_idle_gap")]
    idle_gap_ms: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_retry_gap")]
    retry_gap_ms: u64,
    #[serde(default = "default_confirm_timeout")]
    confirm_timeout_ms: u64,
    #[serde(default = "default_gas_valve_confirm_timeout")]
    gas_valve_confirm_timeout_ms: u64,
    /// JSON file holding the last replay token of every device.
    #[serde(default)]
    state_file: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_checksum() -> String {
    "sum".to_string()
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_reconnect_min() -> u64 {
    1000
}
fn default_reconnect_max() -> u64 {
    30000
}
fn default_idle_gap() -> u64 {
    200
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_gap() -> u64 {
    500
}
fn default_confirm_timeout() -> u64 {
    1000
}
fn default_gas_valve_confirm_timeout() -> u64 {
    1500
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "kocom-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "kocom/cmd".to_string()
}
fn default_publish_topic() -> String {
    "kocom".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn parse_checksum(s: &str) -> Result<Checksum> {
    match s.to_lowercase().as_str() {
        "sum" => Ok(Checksum::Sum),
        "twos_complement" | "twos-complement" => Ok(Checksum::TwosComplement),
        other => anyhow::bail!("Unknown checksum: {other}"),
    }
}

fn build_gateway_config(toml: &GatewayToml) -> Result<GatewayConfig> {
    let endpoint = match Endpoint::new(&toml.host, toml.port)? {
        Endpoint::Serial { path, .. } => Endpoint::Serial {
            path,
            baud_rate: toml.baud_rate,
        },
        tcp => tcp,
    };
    Ok(GatewayConfig::builder()
        .endpoint(endpoint)
        .checksum(parse_checksum(&toml.checksum)?)
        .connect_timeout(Duration::from_millis(toml.connect_timeout_ms))
        .reconnect_backoff(
            Duration::from_millis(toml.reconnect_min_ms),
            Duration::from_millis(toml.reconnect_max_ms),
        )
        .idle_gap(Duration::from_millis(toml.idle_gap_ms))
        .max_attempts(toml.max_attempts)
        .retry_gap(Duration::from_millis(toml.retry_gap_ms))
        .confirm_timeout(Duration::from_millis(toml.confirm_timeout_ms))
        .gas_valve_confirm_timeout(Duration::from_millis(toml.gas_valve_confirm_timeout_ms))
        .build())
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share a flat {now, op, ...} structure

#[derive(Serialize)]
struct MqttDevice {
    key: String,
    platform: Platform,
    state: StateValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribute: Option<Attributes>,
}

impl From<&DeviceState> for MqttDevice {
    fn from(state: &DeviceState) -> Self {
        Self {
            key: state.key.unique_id(),
            platform: state.platform,
            state: state.state,
            attribute: state.attribute.clone(),
        }
    }
}

// Per-device state: {now, op, device}
#[derive(Serialize)]
struct MqttDeviceEvent {
    now: u64,
    op: String,
    device: MqttDevice,
}

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    connected: bool,
    devices: Vec<MqttDevice>,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// Simple event with just {now, op}
#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    speed: Option<u8>,
}

// ---------------------------------------------------------------------------
// State file
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedDevice {
    token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage: Option<serde_json::Value>,
}

/// Last replay token of every device, keyed by unique id.
struct StateStore {
    path: Option<PathBuf>,
    devices: BTreeMap<String, PersistedDevice>,
}

impl StateStore {
    fn load(path: Option<PathBuf>) -> Self {
        let devices = match &path {
            Some(p) if p.exists() => match read_state_file(p) {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("Ignoring state file {}: {e:#}", p.display());
                    BTreeMap::new()
                }
            },
            _ => BTreeMap::new(),
        };
        Self { path, devices }
    }

    /// Record the latest token for `state`. Returns whether anything changed.
    fn record(&mut self, state: &DeviceState) -> bool {
        let Some(token) = state.replay_token() else {
            return false;
        };
        let entry = self.devices.entry(state.key.unique_id()).or_default();
        if entry.token == token {
            return false;
        }
        entry.token = token;
        true
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let written = serde_json::to_vec_pretty(&self.devices)
            .context("Failed to serialize state file")
            .and_then(|json| std::fs::write(path, json).context("Failed to write state file"));
        if let Err(e) = written {
            warn!("{}: {e:#}", path.display());
        }
    }
}

fn read_state_file(path: &Path) -> Result<BTreeMap<String, PersistedDevice>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Replay every persisted device into the gateway and register it.
async fn restore_devices(gateway: &Gateway, store: &StateStore) {
    let mut restored = 0usize;
    for (unique_id, device) in &store.devices {
        let key = match unique_id.parse::<DeviceKey>() {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping persisted device: {e}");
                continue;
            }
        };
        match gateway.replay(key, &device.token, device.storage.clone()).await {
            Ok(_) => {
                if let Err(e) = gateway.promote(key).await {
                    warn!("Failed to promote {key}: {e}");
                    continue;
                }
                restored += 1;
            }
            Err(e) => warn!("Failed to restore {key}: {e}"),
        }
    }
    if restored > 0 {
        info!("Restored {restored} device(s) from state file");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn state_topic(publish_topic: &str, key: &DeviceKey) -> String {
    format!("{publish_topic}/{}/state", key.unique_id())
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_device(client: &AsyncClient, topic: &str, state: &DeviceState, kind: ChangeKind) {
    let op = match kind {
        ChangeKind::New => "DEVICE_NEW",
        ChangeKind::Updated => "DEVICE_UPDATE",
    };
    let msg = MqttDeviceEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
        device: MqttDevice::from(state),
    };
    publish_json(client, &state_topic(topic, &state.key), &msg, true).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
    error: Option<String>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
        error,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_simple_event(client: &AsyncClient, topic: &str, op: &str) {
    let msg = MqttSimpleEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
    };
    publish_json(client, topic, &msg, false).await;
}

async fn build_snapshot(gateway: &Gateway) -> Result<MqttSnapshot> {
    let devices = gateway.snapshot().await?;
    Ok(MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        connected: gateway.is_connected(),
        devices: devices.iter().map(MqttDevice::from).collect(),
    })
}

async fn publish_snapshot(client: &AsyncClient, topic: &str, gateway: &Gateway) {
    match build_snapshot(gateway).await {
        Ok(snapshot) => publish_json(client, &format!("{topic}/snapshot"), &snapshot, true).await,
        Err(e) => warn!("Snapshot failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Gateway event -> MQTT
// ---------------------------------------------------------------------------

async fn handle_gateway_event(
    event: GatewayEvent,
    client: &AsyncClient,
    topic: &str,
    store: &mut StateStore,
) {
    match event {
        GatewayEvent::Connected => {
            info!("Wallpad bus connected");
            publish_simple_event(client, topic, "CONNECTED").await;
        }
        GatewayEvent::Disconnected => {
            warn!("Wallpad bus disconnected");
            publish_simple_event(client, topic, "DISCONNECTED").await;
        }
        GatewayEvent::DeviceChanged { state, kind } => {
            if kind == ChangeKind::New {
                info!("Device {} ({}) registered", state.key, state.platform);
            }
            publish_device(client, topic, &state, kind).await;
            if store.record(&state) {
                store.save();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

fn parse_hvac_mode(s: &str) -> Option<HvacMode> {
    match s {
        "heat" => Some(HvacMode::Heat),
        "off" => Some(HvacMode::Off),
        _ => None,
    }
}

fn parse_climate_preset(s: &str) -> Option<ClimatePreset> {
    match s {
        "away" => Some(ClimatePreset::Away),
        "none" => Some(ClimatePreset::None),
        _ => None,
    }
}

fn parse_ventilation_preset(s: &str) -> Option<VentilationPreset> {
    match s {
        "ventilation" => Some(VentilationPreset::Ventilation),
        "auto" => Some(VentilationPreset::Auto),
        "bypass" => Some(VentilationPreset::Bypass),
        "sleep" => Some(VentilationPreset::Sleep),
        "air_purification" => Some(VentilationPreset::AirPurification),
        _ => None,
    }
}

/// Turn an MQTT device command into an [`Action`] for `key`.
fn parse_action(cmd: &MqttCommand, key: &DeviceKey) -> std::result::Result<Action, String> {
    match cmd.op.as_str() {
        "TURN_ON" => Ok(Action::TurnOn),
        "TURN_OFF" => Ok(Action::TurnOff),
        "SET_HVAC_MODE" => cmd
            .mode
            .as_deref()
            .and_then(parse_hvac_mode)
            .map(Action::SetHvacMode)
            .ok_or_else(|| "missing or invalid mode".to_string()),
        "SET_PRESET" => {
            let preset = cmd.preset.as_deref().ok_or("missing preset")?;
            let action = match key.device_type {
                DeviceType::Thermostat => parse_climate_preset(preset).map(Action::SetClimatePreset),
                DeviceType::Ventilation => {
                    parse_ventilation_preset(preset).map(Action::SetVentilationPreset)
                }
                _ => None,
            };
            action.ok_or_else(|| format!("invalid preset {preset} for {key}"))
        }
        "SET_TEMPERATURE" => cmd
            .temperature
            .map(Action::SetTemperature)
            .ok_or_else(|| "missing temperature".to_string()),
        "SET_SPEED" => cmd
            .speed
            .map(Action::SetSpeed)
            .ok_or_else(|| "missing speed".to_string()),
        other => Err(format!("unknown command {other}")),
    }
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    gateway: &Gateway,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    match cmd.op.as_str() {
        "SNAPSHOT" => {
            debug!("Command: SNAPSHOT");
            match build_snapshot(gateway).await {
                Ok(snapshot) => {
                    let snapshot_value = serde_json::to_value(&snapshot).ok();
                    publish_json(client, &format!("{topic}/snapshot"), &snapshot, true).await;
                    publish_cmd_ack(client, topic, true, src_json, snapshot_value, None).await;
                }
                Err(e) => {
                    publish_cmd_ack(client, topic, false, src_json, None, Some(e.to_string())).await;
                }
            }
        }

        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, true, src_json, None, None).await;
        }

        op => {
            let key = match cmd.key.as_deref().map(str::parse::<DeviceKey>) {
                Some(Ok(key)) => key,
                Some(Err(e)) => {
                    warn!("{op}: {e}");
                    publish_cmd_ack(client, topic, false, src_json, None, Some(e.to_string())).await;
                    return;
                }
                None => {
                    warn!("{op}: missing key");
                    let error = Some("missing key".to_string());
                    publish_cmd_ack(client, topic, false, src_json, None, error).await;
                    return;
                }
            };
            let action = match parse_action(&cmd, &key) {
                Ok(action) => action,
                Err(e) => {
                    warn!("{op} {key}: {e}");
                    publish_cmd_ack(client, topic, false, src_json, None, Some(e)).await;
                    return;
                }
            };

            info!("Command: {action} {key}");
            match gateway.send_action(key, action).await {
                Ok(()) => {
                    info!("{action} {key}: confirmed");
                    let data = gateway
                        .get(key)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|s| serde_json::to_value(MqttDevice::from(&s)).ok());
                    publish_cmd_ack(client, topic, true, src_json, data, None).await;
                }
                Err(e) => {
                    error!("{action} {key} failed: {e}");
                    publish_cmd_ack(client, topic, false, src_json, None, Some(e.to_string())).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=kocom_wallpad=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    let mut gateway_config = build_gateway_config(&config.gateway)?;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        info!("Connecting to wallpad bus at {}", gateway_config.endpoint);
        let gateway = Gateway::connect(gateway_config.clone())?;
        let event_rx = gateway.subscribe();

        let mut store = StateStore::load(config.gateway.state_file.clone());
        restore_devices(&gateway, &store).await;

        // Set up MQTT
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &config.mqtt.username {
            mqtt_opts.set_credentials(username, config.mqtt.password.clone().unwrap_or_default());
        }
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {subscribe_topic}");

        publish_snapshot(&client, &publish_topic, &gateway).await;

        // Task 1: gateway event listener
        let gateway_events = gateway.clone();
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let event_handle = tokio::spawn(async move {
            let mut rx = event_rx;
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        handle_gateway_event(event, &client_events, &topic_events, &mut store).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                        publish_snapshot(&client_events, &topic_events, &gateway_events).await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, dispatches commands)
        let gateway_cmds = gateway.clone();
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic != sub_topic {
                            continue;
                        }
                        let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                        match serde_json::from_str::<MqttCommand>(&payload) {
                            Ok(cmd) => {
                                if cmd.op == "SNAPSHOT" {
                                    debug!("MQTT command received: {payload}");
                                } else {
                                    info!("MQTT command received: {payload}");
                                }
                                // Confirmation can take seconds; keep polling the broker meanwhile.
                                let gateway = gateway_cmds.clone();
                                let client = client_cmds.clone();
                                let topic = topic_cmds.clone();
                                tokio::spawn(async move {
                                    handle_command(&payload, cmd, &client, &topic, &gateway).await;
                                });
                            }
                            Err(e) => {
                                warn!("Failed to parse MQTT command: {e}");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: snapshot timer
        let gateway_snap = gateway.clone();
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let snapshot_interval = Duration::from_secs(config.mqtt.snapshot_interval_secs.max(1));
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(snapshot_interval);
            // The first tick fires immediately and the initial snapshot is already out
            ticker.tick().await;
            loop {
                ticker.tick().await;
                publish_snapshot(&client_snap, &topic_snap, &gateway_snap).await;
            }
        });

        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        mqtt_handle.abort();
        snap_handle.abort();
        gateway.stop().await;
        event_handle.abort();
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match build_gateway_config(&new_config.gateway) {
                Ok(new_gateway_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                    Ok((new_host, new_port)) => {
                        gateway_config = new_gateway_config;
                        mqtt_host = new_host;
                        mqtt_port = new_port;
                        config = new_config;
                        info!("Config reloaded successfully");
                    }
                    Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
                },
                Err(e) => warn!("Invalid gateway config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(json: &str) -> MqttCommand {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(parse_mqtt_url("mqtt://broker:1883").unwrap(), ("broker".to_string(), 1883));
        assert_eq!(parse_mqtt_url("10.0.0.2:1884").unwrap(), ("10.0.0.2".to_string(), 1884));
        assert!(parse_mqtt_url("mqtt://broker").is_err());
    }

    #[test]
    fn test_gateway_toml_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            host = "192.168.0.200"

            [mqtt]
            url = "mqtt://localhost:1883"
            "#,
        )
        .unwrap();
        let gateway = build_gateway_config(&config.gateway).unwrap();
        assert_eq!(gateway.endpoint.to_string(), "192.168.0.200:8899");
        assert_eq!(gateway.checksum, Checksum::Sum);
        assert_eq!(gateway.max_attempts, 3);
        assert_eq!(config.mqtt.publish_topic, "kocom");
        assert!(config.gateway.state_file.is_none());
    }

    #[test]
    fn test_serial_host_keeps_baud_rate() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            host = "/dev/ttyUSB0"
            baud_rate = 19200
            checksum = "twos_complement"

            [mqtt]
            url = "mqtt://localhost:1883"
            "#,
        )
        .unwrap();
        let gateway = build_gateway_config(&config.gateway).unwrap();
        assert_eq!(
            gateway.endpoint,
            Endpoint::Serial {
                path: "/dev/ttyUSB0".to_string(),
                baud_rate: 19200
            }
        );
        assert_eq!(gateway.checksum, Checksum::TwosComplement);
    }

    #[test]
    fn test_parse_action() {
        let thermostat: DeviceKey = "5-1_0-0".parse().unwrap();
        let fan: DeviceKey = "7-0_0-0".parse().unwrap();

        assert_eq!(
            parse_action(&command(r#"{"op":"TURN_ON","key":"1-3_0-0"}"#), &thermostat),
            Ok(Action::TurnOn)
        );
        assert_eq!(
            parse_action(&command(r#"{"op":"SET_PRESET","preset":"away"}"#), &thermostat),
            Ok(Action::SetClimatePreset(ClimatePreset::Away))
        );
        assert_eq!(
            parse_action(&command(r#"{"op":"SET_PRESET","preset":"sleep"}"#), &fan),
            Ok(Action::SetVentilationPreset(VentilationPreset::Sleep))
        );
        assert!(parse_action(&command(r#"{"op":"SET_PRESET","preset":"sleep"}"#), &thermostat).is_err());
        assert_eq!(
            parse_action(&command(r#"{"op":"SET_SPEED","speed":128}"#), &fan),
            Ok(Action::SetSpeed(0x80))
        );
        assert!(parse_action(&command(r#"{"op":"SET_TEMPERATURE"}"#), &thermostat).is_err());
        assert!(parse_action(&command(r#"{"op":"REBOOT"}"#), &fan).is_err());
    }
}

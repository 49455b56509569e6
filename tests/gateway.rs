// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway
//
// End-to-end gateway tests over an in-memory bus, with tokio's clock paused so
// confirmation timeouts and retry gaps can be checked exactly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use kocom_wallpad::constants::{
    CHECKSUM_OFFSET, CHECKSUM_RANGE, COMMAND_OFFSET, CONTROLLER_CODE, CONTROLLER_ROOM,
    DEST_OFFSET, PACKET_LEN, PACKET_PREFIX, PACKET_SUFFIX, PAYLOAD_OFFSET, SRC_OFFSET,
};
use kocom_wallpad::{
    Action, ChangeKind, Checksum, Connection, DeviceKey, DeviceType, EventReceiver, Gateway,
    GatewayConfig, GatewayError, GatewayEvent, Result, StateValue, SubType,
};

const LIGHT: u8 = 0x0E;
const OUTLET: u8 = 0x3B;
const GAS_VALVE: u8 = 0x2C;

type SentLog = Arc<Mutex<Vec<(Instant, Vec<u8>)>>>;
type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send>;

// =========================================================================
// In-memory bus
// =========================================================================

/// Connection whose inbound bytes come from the test and whose writes are logged.
struct MockBus {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    sent: SentLog,
    open: bool,
    dead: bool,
    last_activity: Instant,
}

impl Connection for MockBus {
    async fn open(&mut self) -> Result<()> {
        if self.dead {
            return Err(GatewayError::Disconnected);
        }
        self.open = true;
        self.last_activity = Instant::now();
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(GatewayError::Disconnected);
        }
        self.sent.lock().unwrap().push((Instant::now(), data.to_vec()));
        if let Some(reply) = self.responder.as_ref().and_then(|r| r(data)) {
            self.replies.push_back(reply);
        }
        self.last_activity = Instant::now();
        Ok(data.len())
    }

    async fn receive(&mut self, _max: usize, timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(GatewayError::Disconnected);
        }
        if let Some(reply) = self.replies.pop_front() {
            self.last_activity = Instant::now();
            return Ok(reply);
        }
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(bytes)) => {
                self.last_activity = Instant::now();
                Ok(bytes)
            }
            Ok(None) => {
                self.open = false;
                self.dead = true;
                Err(GatewayError::Disconnected)
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct Harness {
    gateway: Gateway,
    events: EventReceiver,
    bus: mpsc::UnboundedSender<Vec<u8>>,
    sent: SentLog,
}

impl Harness {
    fn start(responder: Option<Responder>) -> Self {
        let (bus, inbound) = mpsc::unbounded_channel();
        let sent = SentLog::default();
        let conn = MockBus {
            inbound,
            replies: VecDeque::new(),
            responder,
            sent: sent.clone(),
            open: false,
            dead: false,
            last_activity: Instant::now(),
        };
        let gateway = Gateway::start(conn, GatewayConfig::builder().build());
        let events = gateway.subscribe();
        Self {
            gateway,
            events,
            bus,
            sent,
        }
    }

    fn echoing() -> Self {
        Self::start(Some(Box::new(echo)))
    }

    fn silent() -> Self {
        Self::start(None)
    }

    fn feed(&self, frame: Vec<u8>) {
        self.bus.send(frame).unwrap();
    }

    fn sent(&self) -> Vec<(Instant, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Next device change, skipping connection events.
    async fn next_change(&mut self) -> (DeviceKey, ChangeKind) {
        loop {
            match self.events.recv().await.unwrap() {
                GatewayEvent::DeviceChanged { state, kind } => return (state.key, kind),
                _ => continue,
            }
        }
    }
}

/// Device-to-controller frame with a valid sum checksum.
fn device_frame(code: u8, room: u8, command: u8, payload: [u8; 8]) -> Vec<u8> {
    let mut raw = vec![0u8; PACKET_LEN];
    raw[..2].copy_from_slice(&PACKET_PREFIX);
    raw[2] = 0x30;
    raw[3] = 0xDC;
    raw[DEST_OFFSET] = CONTROLLER_CODE;
    raw[DEST_OFFSET + 1] = CONTROLLER_ROOM;
    raw[SRC_OFFSET] = code;
    raw[SRC_OFFSET + 1] = room;
    raw[COMMAND_OFFSET] = command;
    raw[PAYLOAD_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&payload);
    raw[CHECKSUM_OFFSET] = Checksum::Sum.compute(&raw[CHECKSUM_RANGE]);
    raw[PACKET_LEN - 2..].copy_from_slice(&PACKET_SUFFIX);
    raw
}

/// A device that acknowledges every command by reporting the requested state.
fn echo(sent: &[u8]) -> Option<Vec<u8>> {
    let payload: [u8; 8] = sent[PAYLOAD_OFFSET..CHECKSUM_OFFSET].try_into().ok()?;
    Some(device_frame(
        sent[DEST_OFFSET],
        sent[DEST_OFFSET + 1],
        sent[COMMAND_OFFSET],
        payload,
    ))
}

fn payload_of(frame: &[u8]) -> &[u8] {
    &frame[PAYLOAD_OFFSET..CHECKSUM_OFFSET]
}

fn light(room: u8, idx: u8) -> DeviceKey {
    DeviceKey::new(DeviceType::Light, room, idx, SubType::None)
}

fn outlet(room: u8, idx: u8) -> DeviceKey {
    DeviceKey::new(DeviceType::Outlet, room, idx, SubType::None)
}

fn gas_valve() -> DeviceKey {
    DeviceKey::new(DeviceType::GasValve, 0, 0, SubType::None)
}

// =========================================================================
// Confirmation and retries
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_send_action_confirmed() {
    let mut h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(LIGHT, 1, 0x00, [0, 0, 0xFF, 0, 0, 0, 0, 0]));
    assert_eq!(h.next_change().await, (light(1, 2), ChangeKind::New));

    h.gateway.send_action(light(1, 0), Action::TurnOn).await.unwrap();

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(payload_of(&sent[0].1), &[0xFF, 0, 0xFF, 0, 0, 0, 0, 0]);
    assert_eq!(sent[0].1[DEST_OFFSET], LIGHT);
    assert_eq!(sent[0].1[DEST_OFFSET + 1], 1);

    let state = h.gateway.get(light(1, 0)).await.unwrap().unwrap();
    assert_eq!(state.state, StateValue::Binary(true));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_action_retries_then_fails() {
    let mut h = Harness::silent();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(OUTLET, 2, 0x00, [0xFF, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(h.next_change().await, (outlet(2, 0), ChangeKind::New));

    let err = h
        .gateway
        .send_action(outlet(2, 0), Action::TurnOff)
        .await
        .unwrap_err();
    let finished = Instant::now();

    match err {
        GatewayError::ConfirmationTimeout { key, attempts, .. } => {
            assert_eq!(key, outlet(2, 0));
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    let sent = h.sent();
    assert_eq!(sent.len(), 3);
    // 1 s confirmation timeout + 500 ms retry gap between attempts
    for pair in sent.windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(gap >= Duration::from_millis(1500), "{gap:?}");
        assert!(gap < Duration::from_millis(1600), "{gap:?}");
    }
    assert!(sent.iter().all(|(_, frame)| frame == &sent[0].1));

    let total = finished - sent[0].0;
    assert!(total >= Duration::from_secs(4), "{total:?}");
    assert!(total < Duration::from_millis(4100), "{total:?}");
}

#[tokio::test(start_paused = true)]
async fn test_gas_valve_close_confirmed() {
    let mut h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(GAS_VALVE, 0, 0x01, [0; 8]));
    assert_eq!(h.next_change().await, (gas_valve(), ChangeKind::New));

    h.gateway.send_action(gas_valve(), Action::TurnOff).await.unwrap();
    let state = h.gateway.get(gas_valve()).await.unwrap().unwrap();
    assert!(!state.state.is_on());
    assert_eq!(h.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_encoding_errors_send_nothing() {
    let h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    let err = h
        .gateway
        .send_action(light(5, 0), Action::TurnOn)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::MissingChannelBaseline { room_index: 5, .. }));

    let err = h
        .gateway
        .send_action(gas_valve(), Action::TurnOn)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedAction { .. }));

    let motion = DeviceKey::new(DeviceType::Motion, 0, 0, SubType::None);
    let err = h.gateway.send_action(motion, Action::TurnOn).await.unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedDevice(DeviceType::Motion)));

    assert!(h.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_actions_are_serialized() {
    let mut h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(LIGHT, 1, 0x00, [0, 0, 0xFF, 0, 0, 0, 0, 0]));
    assert_eq!(h.next_change().await, (light(1, 2), ChangeKind::New));

    let (a, b) = tokio::join!(
        h.gateway.send_action(light(1, 0), Action::TurnOn),
        h.gateway.send_action(light(1, 1), Action::TurnOn),
    );
    a.unwrap();
    b.unwrap();

    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    // The second command is built from the first one's confirmed result
    assert_eq!(payload_of(&sent[1].1), &[0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0]);
    assert!(sent[1].0 > sent[0].0);
}

// =========================================================================
// Idle wait
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_waits_for_quiet_bus() {
    let started = Instant::now();
    let mut h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(OUTLET, 1, 0x00, [0xFF, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(h.next_change().await, (outlet(1, 0), ChangeKind::New));
    let last_rx = Instant::now();

    h.gateway.send_action(outlet(1, 0), Action::TurnOff).await.unwrap();

    let sent_at = h.sent()[0].0;
    assert!(sent_at - last_rx >= Duration::from_millis(190));
    assert!(sent_at - started < Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_busy_bus_sends_after_idle_budget() {
    let mut h = Harness::echoing();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(OUTLET, 1, 0x00, [0xFF, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(h.next_change().await, (outlet(1, 0), ChangeKind::New));

    let chatter_bus = h.bus.clone();
    let chatter = tokio::spawn(async move {
        loop {
            if chatter_bus.send(vec![0x00]).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    let requested = Instant::now();
    h.gateway.send_action(outlet(1, 0), Action::TurnOff).await.unwrap();
    chatter.abort();

    let waited = h.sent()[0].0 - requested;
    assert!(waited >= Duration::from_secs(1), "{waited:?}");
    assert!(waited < Duration::from_millis(1100), "{waited:?}");
}

// =========================================================================
// Registry behaviour through the gateway
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_off_channels_are_not_registered() {
    let mut h = Harness::silent();
    h.gateway.wait_connected().await.unwrap();

    h.feed(device_frame(LIGHT, 2, 0x00, [0; 8]));
    h.feed(device_frame(GAS_VALVE, 0, 0x02, [0; 8]));
    assert_eq!(h.next_change().await, (gas_valve(), ChangeKind::New));

    let snapshot = h.gateway.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].key, gas_valve());

    // The all-off frame still provides a baseline for commands
    let sent = tokio::time::timeout(
        Duration::from_secs(10),
        h.gateway.send_action(light(2, 3), Action::TurnOn),
    )
    .await
    .unwrap();
    assert!(matches!(sent, Err(GatewayError::ConfirmationTimeout { .. })));
    assert_eq!(payload_of(&h.sent()[0].1), &[0, 0, 0, 0xFF, 0, 0, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_replay_forces_registration_of_off_channel() {
    let mut h = Harness::silent();
    h.gateway.wait_connected().await.unwrap();

    let frame = device_frame(OUTLET, 2, 0x00, [0; 8]);
    let key = outlet(2, 1);
    let restored = h
        .gateway
        .replay(key, &hex::encode(&frame), Some(json!({ "name": "tv" })))
        .await
        .unwrap();
    assert_eq!(restored.key, key);
    assert_eq!(restored.state, StateValue::Binary(false));

    assert!(h.gateway.get(key).await.unwrap().is_none());
    assert!(h.gateway.get_with_shadow(key).await.unwrap().is_some());
    assert_eq!(
        h.gateway.device_storage(key).await.unwrap(),
        Some(json!({ "name": "tv" }))
    );

    h.feed(frame);
    assert_eq!(h.next_change().await, (key, ChangeKind::New));

    let snapshot = h.gateway.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].key, key);
}

#[tokio::test(start_paused = true)]
async fn test_promote_registers_replayed_device() {
    let mut h = Harness::silent();
    h.gateway.wait_connected().await.unwrap();

    let frame = device_frame(GAS_VALVE, 0, 0x01, [0; 8]);
    h.gateway
        .replay(gas_valve(), &hex::encode(&frame), None)
        .await
        .unwrap();

    let promoted = h.gateway.promote(gas_valve()).await.unwrap().unwrap();
    assert!(promoted.state.is_on());
    assert_eq!(h.next_change().await, (gas_valve(), ChangeKind::New));
    assert!(h.gateway.get(gas_valve()).await.unwrap().is_some());

    // Nothing left in the shadow registry to promote
    assert!(h.gateway.promote(gas_valve()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_replay_tokens() {
    let h = Harness::silent();

    let err = h.gateway.replay(gas_valve(), "not hex", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidReplay { .. }));

    let err = h.gateway.replay(gas_valve(), "aa55", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidReplay { .. }));

    let light_frame = device_frame(LIGHT, 1, 0x00, [0xFF; 8]);
    let err = h
        .gateway
        .replay(outlet(1, 0), &hex::encode(&light_frame), None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidReplay { .. }));

    assert!(h.gateway.snapshot().await.unwrap().is_empty());
}

// =========================================================================
// Connection lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_fails_pending_sends() {
    let Harness {
        gateway,
        mut events,
        bus,
        ..
    } = Harness::silent();
    gateway.wait_connected().await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), GatewayEvent::Connected));

    drop(bus);
    assert!(matches!(events.recv().await.unwrap(), GatewayEvent::Disconnected));
    assert!(!gateway.is_connected());

    let err = gateway.send_action(gas_valve(), Action::TurnOff).await.unwrap_err();
    assert!(matches!(err, GatewayError::Disconnected));
    assert!(err.is_retryable());

    // Queries are still answered while reconnecting
    assert!(gateway.snapshot().await.unwrap().is_empty());
    gateway.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_gateway_rejects_requests() {
    let h = Harness::silent();
    h.gateway.wait_connected().await.unwrap();
    h.gateway.stop().await;

    assert!(!h.gateway.is_connected());
    let err = h.gateway.snapshot().await.unwrap_err();
    assert!(matches!(err, GatewayError::GatewayStopped | GatewayError::ChannelClosed));
}

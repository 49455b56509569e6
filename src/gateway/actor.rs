// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::event::{ChangeKind, EventSender, GatewayEvent};
use crate::frame::{FrameSynchronizer, PacketFrame};
use crate::model::{DeviceKey, DeviceState, Platform};
use crate::protocol::{Action, EncodedCommand, Expectation, PacketCodec};
use crate::registry::{DeviceRegistry, Upsert};
use crate::transport::Connection;

use super::pending::PendingWaiters;

/// Requests from [`super::Gateway`] handles to the task that owns the bus.
pub(crate) enum GatewayCommand {
    Get {
        key: DeviceKey,
        include_shadow: bool,
        reply: oneshot::Sender<Option<DeviceState>>,
    },
    AllByPlatform {
        platform: Platform,
        reply: oneshot::Sender<Vec<DeviceState>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<DeviceState>>,
    },
    Encode {
        key: DeviceKey,
        action: Action,
        reply: oneshot::Sender<Result<EncodedCommand>>,
    },
    Expect {
        id: u64,
        expectation: Expectation,
        reply: oneshot::Sender<DeviceState>,
    },
    CancelWaiter {
        id: u64,
    },
    Transmit {
        frame: PacketFrame,
        reply: oneshot::Sender<Result<()>>,
    },
    /// `None` while disconnected.
    IdleTime {
        reply: oneshot::Sender<Option<Duration>>,
    },
    Replay {
        key: DeviceKey,
        token: String,
        storage: Option<serde_json::Value>,
        reply: oneshot::Sender<Result<DeviceState>>,
    },
    Promote {
        key: DeviceKey,
        reply: oneshot::Sender<Option<DeviceState>>,
    },
    Storage {
        key: DeviceKey,
        reply: oneshot::Sender<Option<serde_json::Value>>,
    },
}

enum Exit {
    Shutdown,
    Disconnected,
}

/// Owns the connection, the registry and the waiter set.
///
/// Nothing else touches them; handles go through [`GatewayCommand`]s.
pub(crate) struct GatewayActor<C> {
    conn: C,
    config: Arc<GatewayConfig>,
    codec: PacketCodec,
    sync: FrameSynchronizer,
    registry: DeviceRegistry,
    waiters: PendingWaiters,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    events: EventSender,
    shutdown: watch::Receiver<bool>,
    connected: watch::Sender<bool>,
}

impl<C: Connection> GatewayActor<C> {
    pub fn new(
        conn: C,
        config: Arc<GatewayConfig>,
        commands: mpsc::UnboundedReceiver<GatewayCommand>,
        events: EventSender,
        shutdown: watch::Receiver<bool>,
        connected: watch::Sender<bool>,
    ) -> Self {
        let codec = PacketCodec::new(config.checksum, config.confirm_timeouts);
        Self {
            conn,
            config,
            codec,
            sync: FrameSynchronizer::new(),
            registry: DeviceRegistry::new(),
            waiters: PendingWaiters::default(),
            commands,
            events,
            shutdown,
            connected,
        }
    }

    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if self.conn.is_open() {
                self.on_connected();
                match self.pump().await {
                    Exit::Shutdown => break,
                    Exit::Disconnected => {
                        self.on_disconnected();
                        self.conn.close().await;
                        let delay = self.config.reconnect_min;
                        if let Exit::Shutdown = self.backoff(delay).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let opened = tokio::select! {
                _ = self.shutdown.changed() => break,
                opened = self.conn.open() => opened,
            };
            match opened {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.reconnect_delay(failures);
                    warn!("Connection failed: {}, retrying in {:?}", e, delay);
                    if let Exit::Shutdown = self.backoff(delay).await {
                        break;
                    }
                }
            }
        }

        self.conn.close().await;
        self.connected.send_replace(false);
        info!("Gateway stopped");
    }

    /// Serve commands and bus traffic while the connection is up.
    async fn pump(&mut self) -> Exit {
        let chunk = self.config.recv_chunk;
        let poll = self.config.recv_poll;
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => return Exit::Shutdown,
                },
                read = self.conn.receive(chunk, poll) => match read {
                    Ok(bytes) => self.on_bytes(&bytes),
                    Err(e) => {
                        warn!("Connection lost: {}", e);
                        return Exit::Disconnected;
                    }
                },
            }
        }
    }

    /// Sleep out a reconnect delay while still answering commands.
    async fn backoff(&mut self, delay: Duration) -> Exit {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                _ = &mut sleep => return Exit::Disconnected,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => return Exit::Shutdown,
                },
            }
        }
    }

    fn on_connected(&mut self) {
        if !*self.connected.borrow() {
            self.connected.send_replace(true);
            let _ = self.events.send(GatewayEvent::Connected);
        }
    }

    fn on_disconnected(&mut self) {
        if self.waiters.len() > 0 {
            debug!("{} confirmation(s) pending across disconnect", self.waiters.len());
        }
        self.sync.clear();
        self.connected.send_replace(false);
        let _ = self.events.send(GatewayEvent::Disconnected);
    }

    async fn handle_command(&mut self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Get {
                key,
                include_shadow,
                reply,
            } => {
                let state = if include_shadow {
                    self.registry.get_with_shadow(&key)
                } else {
                    self.registry.get(&key)
                };
                let _ = reply.send(state.cloned());
            }
            GatewayCommand::AllByPlatform { platform, reply } => {
                let _ = reply.send(self.registry.all_by_platform(platform));
            }
            GatewayCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.all().cloned().collect());
            }
            GatewayCommand::Encode { key, action, reply } => {
                let _ = reply.send(self.codec.encode(&key, &action, &self.registry));
            }
            GatewayCommand::Expect {
                id,
                expectation,
                reply,
            } => self.waiters.insert(id, expectation, reply),
            GatewayCommand::CancelWaiter { id } => {
                self.waiters.cancel(id);
            }
            GatewayCommand::Transmit { frame, reply } => {
                let sent = self.conn.send(frame.raw()).await.map(|_| ());
                let _ = reply.send(sent);
            }
            GatewayCommand::IdleTime { reply } => {
                let idle = self.conn.is_open().then(|| self.conn.idle_time());
                let _ = reply.send(idle);
            }
            GatewayCommand::Replay {
                key,
                token,
                storage,
                reply,
            } => {
                let _ = reply.send(self.replay(key, &token, storage));
            }
            GatewayCommand::Promote { key, reply } => {
                let promoted = self.registry.promote(&key);
                if let Some(state) = &promoted {
                    info!("Restored device promoted -> {}", key);
                    self.emit(state, ChangeKind::New);
                }
                let _ = reply.send(promoted);
            }
            GatewayCommand::Storage { key, reply } => {
                let _ = reply.send(self.registry.storage(&key).cloned());
            }
        }
    }

    fn on_bytes(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        for frame in self.sync.feed(chunk) {
            for state in self.codec.decode(&frame) {
                self.on_device_state(state);
            }
        }
    }

    fn on_device_state(&mut self, state: DeviceState) {
        let allow_insert = state.auto_register;
        match self.registry.upsert(state.clone(), allow_insert) {
            Upsert::New => {
                info!(
                    "New device has been detected. Register -> {} ({})",
                    state.key, state.platform
                );
                self.emit(&state, ChangeKind::New);
            }
            Upsert::Updated | Upsert::Reclassified { .. } => {
                debug!("Device state has been changed. Update -> {}", state.key);
                self.emit(&state, ChangeKind::Updated);
            }
            Upsert::Unchanged | Upsert::Rejected => {}
        }
        self.waiters.notify(&state);
    }

    fn emit(&self, state: &DeviceState, kind: ChangeKind) {
        let _ = self.events.send(GatewayEvent::DeviceChanged {
            state: state.clone(),
            kind,
        });
    }

    /// Stage a persisted state for `key` in the shadow registry.
    fn replay(
        &mut self,
        key: DeviceKey,
        token: &str,
        storage: Option<serde_json::Value>,
    ) -> Result<DeviceState> {
        let bytes = hex::decode(token.trim()).map_err(|e| GatewayError::InvalidReplay {
            details: format!("{key}: {e}"),
        })?;
        let frame = PacketFrame::from_slice(&bytes).ok_or_else(|| GatewayError::InvalidReplay {
            details: format!("{key}: not a complete frame"),
        })?;
        let state = self
            .codec
            .decode(&frame)
            .into_iter()
            .find(|s| s.key == key)
            .ok_or_else(|| GatewayError::InvalidReplay {
                details: format!("{key}: token does not describe this device"),
            })?;

        if let Some(storage) = storage {
            self.registry.set_storage(key, storage);
        }
        if self.registry.insert_shadow(state.clone()) {
            debug!("Restore state -> {} from {}", key, frame.to_hex());
        } else {
            debug!("Restore state -> {} is already live, keeping it", key);
        }
        Ok(state)
    }
}

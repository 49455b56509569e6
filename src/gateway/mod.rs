// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

mod actor;
mod pending;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::event::{EventReceiver, EventSender, event_channel};
use crate::model::{DeviceKey, DeviceState, Platform};
use crate::protocol::{Action, Expectation};
use crate::transport::{AnyConnection, Connection};

use actor::{GatewayActor, GatewayCommand};
use pending::WaiterGuard;

/// The main public API for talking to a Kocom wallpad bus.
///
/// Cheap to clone; all clones drive the same background task. The task stops
/// on [`stop`](Self::stop) or when the last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use kocom_wallpad::{Action, DeviceKey, DeviceType, Gateway, GatewayConfig, SubType};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = GatewayConfig::builder()
///         .endpoint("192.168.0.200:8899".parse()?)
///         .build();
///
///     let gateway = Gateway::connect(config)?;
///     gateway.wait_connected().await?;
///
///     let mut events = gateway.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     let living_room_light = DeviceKey::new(DeviceType::Light, 1, 0, SubType::None);
///     gateway.send_action(living_room_light, Action::TurnOn).await?;
///
///     tokio::signal::ctrl_c().await?;
///     gateway.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Gateway {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    events: EventSender,
    shutdown: Arc<watch::Sender<bool>>,
    connected: watch::Receiver<bool>,
    send_lock: Arc<Mutex<()>>,
    next_waiter: Arc<AtomicU64>,
    config: Arc<GatewayConfig>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Gateway {
    /// Start a gateway on the endpoint from `config`.
    ///
    /// Returns immediately; the connection is opened, and reopened with
    /// backoff, by the background task. Must be called inside a tokio runtime.
    pub fn connect(config: GatewayConfig) -> Result<Self> {
        let conn = AnyConnection::from_endpoint(&config.endpoint, config.connect_timeout)?;
        info!("Starting gateway - {}", config.endpoint);
        Ok(Self::start(conn, config))
    }

    /// Start a gateway over any [`Connection`].
    pub fn start<C>(conn: C, config: GatewayConfig) -> Self
    where
        C: Connection + 'static,
    {
        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = event_channel(config.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = watch::channel(false);

        let actor = GatewayActor::new(
            conn,
            config.clone(),
            cmd_rx,
            event_tx.clone(),
            shutdown_rx,
            connected_tx,
        );
        let handle = tokio::spawn(actor.run());

        Self {
            commands: cmd_tx,
            events: event_tx,
            shutdown: Arc::new(shutdown_tx),
            connected: connected_rx,
            send_lock: Arc::new(Mutex::new(())),
            next_waiter: Arc::new(AtomicU64::new(1)),
            config,
            task: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Subscribe to connection and device events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the bus connection is up.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut connected = self.connected.clone();
        connected
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::GatewayStopped)
    }

    /// Latest live state of `key`.
    pub async fn get(&self, key: DeviceKey) -> Result<Option<DeviceState>> {
        self.request(|reply| GatewayCommand::Get {
            key,
            include_shadow: false,
            reply,
        })
        .await
    }

    /// Like [`get`](Self::get) but also returns restored, not yet confirmed states.
    pub async fn get_with_shadow(&self, key: DeviceKey) -> Result<Option<DeviceState>> {
        self.request(|reply| GatewayCommand::Get {
            key,
            include_shadow: true,
            reply,
        })
        .await
    }

    pub async fn all_by_platform(&self, platform: Platform) -> Result<Vec<DeviceState>> {
        self.request(|reply| GatewayCommand::AllByPlatform { platform, reply })
            .await
    }

    /// Every registered device, ordered by key.
    pub async fn snapshot(&self) -> Result<Vec<DeviceState>> {
        self.request(|reply| GatewayCommand::Snapshot { reply }).await
    }

    /// Send `action` to `key` and wait until the bus confirms it.
    ///
    /// Encoding errors are returned before anything is sent. Unconfirmed
    /// sends are retried up to `max_attempts` times, `retry_gap` apart, and
    /// then fail with [`GatewayError::ConfirmationTimeout`]. Only one action
    /// is on the bus at a time; concurrent callers queue.
    pub async fn send_action(&self, key: DeviceKey, action: Action) -> Result<()> {
        let _bus = self.send_lock.lock().await;

        let encoded = self
            .request(|reply| GatewayCommand::Encode { key, action, reply })
            .await??;
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            self.wait_for_idle().await?;

            let (confirmed, _guard) = self.expect(encoded.expectation.clone())?;
            let frame = encoded.frame;
            self.request(|reply| GatewayCommand::Transmit { frame, reply })
                .await??;

            match timeout(encoded.expectation.timeout, confirmed).await {
                Ok(Ok(_)) => {
                    debug!("Command '{}' confirmed on attempt {}", action, attempt);
                    return Ok(());
                }
                Ok(Err(_)) => return Err(GatewayError::GatewayStopped),
                Err(_) if attempt < max_attempts => {
                    warn!(
                        "No confirmation for '{}' on {} (attempt {}/{}). Retrying in {:?}...",
                        action, key, attempt, max_attempts, self.config.retry_gap
                    );
                    sleep(self.config.retry_gap).await;
                }
                Err(_) => {}
            }
        }

        error!("Command '{}' on {} failed after {} attempts", action, key, max_attempts);
        Err(GatewayError::ConfirmationTimeout {
            key,
            action: action.name().to_string(),
            attempts: max_attempts,
        })
    }

    /// Restore a persisted state from its replay token.
    ///
    /// The state is staged without creating the device; it becomes visible to
    /// [`get`](Self::get) and [`snapshot`](Self::snapshot) once live traffic
    /// confirms it or [`promote`](Self::promote) is called.
    pub async fn replay(
        &self,
        key: DeviceKey,
        token: &str,
        storage: Option<serde_json::Value>,
    ) -> Result<DeviceState> {
        let token = token.to_string();
        self.request(|reply| GatewayCommand::Replay {
            key,
            token,
            storage,
            reply,
        })
        .await?
    }

    /// Register a replayed device without waiting for live traffic.
    pub async fn promote(&self, key: DeviceKey) -> Result<Option<DeviceState>> {
        self.request(|reply| GatewayCommand::Promote { key, reply })
            .await
    }

    /// Storage blob attached to `key` by a replay.
    pub async fn device_storage(&self, key: DeviceKey) -> Result<Option<serde_json::Value>> {
        self.request(|reply| GatewayCommand::Storage { key, reply })
            .await
    }

    /// Stop the background task and close the connection.
    pub async fn stop(&self) {
        info!("Stopping gateway - {}", self.config.endpoint);
        self.shutdown.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Wait for the bus to go quiet, up to the idle wait budget.
    async fn wait_for_idle(&self) -> Result<()> {
        let started = Instant::now();
        debug!("Waiting for idle state (max {:?})...", self.config.idle_wait_budget);
        loop {
            let idle = self
                .request(|reply| GatewayCommand::IdleTime { reply })
                .await?
                .ok_or(GatewayError::Disconnected)?;
            if idle >= self.config.idle_gap {
                return Ok(());
            }
            if started.elapsed() >= self.config.idle_wait_budget {
                debug!("Idle wait timeout after {:?}", started.elapsed());
                return Ok(());
            }
            sleep(self.config.idle_poll.min(self.config.idle_gap - idle)).await;
        }
    }

    /// Register a waiter for `expectation`, before the frame goes out.
    fn expect(
        &self,
        expectation: Expectation,
    ) -> Result<(oneshot::Receiver<DeviceState>, WaiterGuard)> {
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (reply, confirmed) = oneshot::channel();
        self.commands.send(GatewayCommand::Expect {
            id,
            expectation,
            reply,
        })?;
        let guard = WaiterGuard {
            id,
            commands: self.commands.clone(),
        };
        Ok((confirmed, guard))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> GatewayCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply))?;
        Ok(response.await?)
    }
}

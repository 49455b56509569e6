// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::model::DeviceState;
use crate::protocol::Expectation;

use super::actor::GatewayCommand;

struct Waiter {
    id: u64,
    expectation: Expectation,
    reply: oneshot::Sender<DeviceState>,
}

/// Callers waiting for a state update that confirms their command.
///
/// Each waiter resolves at most once and is removed when it does.
#[derive(Default)]
pub(crate) struct PendingWaiters {
    waiters: Vec<Waiter>,
}

impl PendingWaiters {
    pub fn insert(&mut self, id: u64, expectation: Expectation, reply: oneshot::Sender<DeviceState>) {
        debug!("Waiting for confirmation on {} (waiter {})", expectation.key, id);
        self.waiters.push(Waiter {
            id,
            expectation,
            reply,
        });
    }

    pub fn cancel(&mut self, id: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        before != self.waiters.len()
    }

    /// Resolve every waiter confirmed by `state`. Returns how many resolved.
    pub fn notify(&mut self, state: &DeviceState) -> usize {
        if self.waiters.is_empty() {
            return 0;
        }
        // Callers that went away without cancelling are dropped here too.
        self.waiters.retain(|w| !w.reply.is_closed());

        let (hit, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.expectation.matches(state));
        self.waiters = keep;

        let resolved = hit.len();
        for waiter in hit {
            debug!("Waiter {} confirmed by {}", waiter.id, state.key);
            let _ = waiter.reply.send(state.clone());
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}

/// Cancels its waiter when dropped, so an abandoned wait never leaks.
pub(crate) struct WaiterGuard {
    pub id: u64,
    pub commands: mpsc::UnboundedSender<GatewayCommand>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let _ = self.commands.send(GatewayCommand::CancelWaiter { id: self.id });
    }
}

//! Running commands, one per client address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle {
    pub id: u64,
    /// Cancelling it terminates the command.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessRegistry {
    processes: Arc<Mutex<HashMap<IpAddr, ProcessHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl ProcessRegistry {
    /// Register a new command for `client`. A command still registered for
    /// the same client is forgotten, not stopped.
    pub fn register(&self, client: IpAddr, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .lock()
            .insert(client, ProcessHandle { id, cancel });
        if let Some(previous) = previous {
            warn!(%client, replaced = previous.id, "client started a second command");
        }
        id
    }

    /// Remove and return the command registered for `client`.
    pub fn take(&self, client: IpAddr) -> Option<ProcessHandle> {
        self.lock().remove(&client)
    }

    /// Forget the command `id` once it has finished, unless a newer one took
    /// its place.
    pub fn finished(&self, client: IpAddr, id: u64) {
        let mut processes = self.lock();
        if processes.get(&client).is_some_and(|handle| handle.id == id) {
            processes.remove(&client);
        }
    }

    pub fn is_running(&self, client: IpAddr) -> bool {
        self.lock().contains_key(&client)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IpAddr, ProcessHandle>> {
        // The map stays consistent even if a holder panicked.
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/*
 * transfer.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Mapsync, a Bluetooth message access backend for mail clients.
 *
 * Mapsync is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Mapsync is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Mapsync.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Transfer bridge: turns the asynchronous MAP "get message" into a blocking call with a
//! deadline.
//!
//! A transfer is registered under its id as soon as the device hands the id back. Status
//! notifications arrive on the transport's event thread through `TransferEvents`; the first
//! final status ("complete" or "error") resolves the handle and wakes its waiter. A handle
//! that times out is unregistered, so a notification arriving later finds nothing to resolve.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::protocol::map::remote::{TransferId, TRANSFER_COMPLETE, TRANSFER_ERROR};
use crate::protocol::map::session::FolderScope;
use crate::store::StoreError;

/// How long a message transfer may take before the caller gets `Timeout`.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Life cycle of one transfer. Leaves `Pending` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Complete,
    Failed(String),
    TimedOut,
}

/// One outstanding transfer.
#[derive(Debug)]
pub struct TransferHandle {
    id: TransferId,
    destination: PathBuf,
    deadline: Instant,
    state: Mutex<TransferState>,
    resolved: Condvar,
}

impl TransferHandle {
    fn new(id: TransferId, destination: PathBuf, deadline: Instant) -> Self {
        Self {
            id,
            destination,
            deadline,
            state: Mutex::new(TransferState::Pending),
            resolved: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> TransferState {
        self.lock().clone()
    }

    /// Move out of Pending. Returns false if already resolved.
    fn resolve(&self, outcome: TransferState) -> bool {
        let mut state = self.lock();
        if *state != TransferState::Pending {
            return false;
        }
        *state = outcome;
        drop(state);
        self.resolved.notify_all();
        true
    }

    /// Block until resolved or past the deadline.
    fn wait(&self) -> TransferState {
        let mut state = self.lock();
        while *state == TransferState::Pending {
            let now = Instant::now();
            if now >= self.deadline {
                *state = TransferState::TimedOut;
                break;
            }
            let (guard, _) = self
                .resolved
                .wait_timeout(state, self.deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        state.clone()
    }
}

/// Correlates transfer notifications with blocked callers.
#[derive(Debug)]
pub struct TransferBridge {
    pending: Mutex<HashMap<TransferId, Arc<TransferHandle>>>,
    timeout: Duration,
}

impl TransferBridge {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TransferId, Arc<TransferHandle>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sink for the transport's status notifications.
    pub fn events(self: &Arc<Self>) -> TransferEvents {
        TransferEvents {
            bridge: Arc::downgrade(self),
        }
    }

    /// Number of transfers still registered.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Ask the device for `object_path` and register the transfer. Must run inside the folder
    /// scope that holds the message; waiting happens afterwards, outside the scope.
    pub fn start_transfer(
        &self,
        scope: &FolderScope<'_>,
        object_path: &str,
        destination: &Path,
    ) -> Result<Arc<TransferHandle>, StoreError> {
        let id = scope.get_message(object_path, destination)?;
        let handle = Arc::new(TransferHandle::new(
            id.clone(),
            destination.to_path_buf(),
            Instant::now() + self.timeout,
        ));
        self.pending().insert(id.clone(), handle.clone());
        debug!("transfer {} started for {}", id, object_path);
        // A fast transfer can finish before it was registered; its notification was dropped.
        if let Some(status) = scope.transfer_status(&id) {
            Self::apply(&handle, &status);
        }
        Ok(handle)
    }

    fn apply(handle: &TransferHandle, status: &str) -> bool {
        match status {
            TRANSFER_COMPLETE => handle.resolve(TransferState::Complete),
            TRANSFER_ERROR => handle.resolve(TransferState::Failed(format!(
                "transfer {} reported an error",
                handle.id
            ))),
            other => {
                trace!("transfer {} status {}", handle.id, other);
                false
            }
        }
    }

    /// A status change for transfer `id`. Returns true if it resolved a waiting transfer.
    pub fn notify(&self, id: &str, status: &str) -> bool {
        let handle = self.pending().get(id).cloned();
        match handle {
            Some(handle) => Self::apply(&handle, status),
            None => {
                trace!("status {} for unknown transfer {}", status, id);
                false
            }
        }
    }

    /// Wait for `handle` and unregister it. Ok holds the file the device wrote.
    pub fn await_completion(&self, handle: &TransferHandle) -> Result<PathBuf, StoreError> {
        let state = handle.wait();
        self.pending().remove(&handle.id);
        match state {
            TransferState::Complete => {
                debug!("transfer {} complete", handle.id);
                Ok(handle.destination.clone())
            }
            TransferState::Failed(msg) => Err(StoreError::Protocol(msg)),
            TransferState::TimedOut | TransferState::Pending => {
                warn!("transfer {} timed out after {:?}", handle.id, self.timeout);
                Err(StoreError::Timeout(format!(
                    "transfer {} did not complete within {}s",
                    handle.id,
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}

/// Cloneable handle the transport uses to report transfer status from any thread.
#[derive(Debug, Clone)]
pub struct TransferEvents {
    bridge: Weak<TransferBridge>,
}

impl TransferEvents {
    /// Report that transfer `id` now has `status` ("complete", "error", or anything else,
    /// which is ignored). Returns true if a waiter was released.
    pub fn notify(&self, id: &str, status: &str) -> bool {
        match self.bridge.upgrade() {
            Some(bridge) => bridge.notify(id, status),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::map::remote::{FolderEntry, MapSession, MessageListing};
    use crate::protocol::map::session::{SessionCoordinator, MAP_ROOT};
    use std::thread;

    /// Device whose transfers report a fixed status when queried.
    struct Device {
        status: Option<&'static str>,
    }

    impl MapSession for Device {
        fn session_path(&self) -> String {
            "/s".to_string()
        }
        fn set_folder(&self, _path: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn list_folders(&self) -> Result<Vec<FolderEntry>, StoreError> {
            Ok(Vec::new())
        }
        fn list_messages(&self, _folder: &str) -> Result<Vec<MessageListing>, StoreError> {
            Ok(Vec::new())
        }
        fn get_message(&self, object_path: &str, _destination: &Path) -> Result<TransferId, StoreError> {
            Ok(format!("xfer-{}", object_path.trim_start_matches("/s/message")))
        }
        fn set_message_property(&self, _o: &str, _n: &str, _v: bool) -> Result<(), StoreError> {
            Ok(())
        }
        fn transfer_status(&self, _id: &str) -> Option<String> {
            self.status.map(str::to_string)
        }
    }

    fn start(bridge: &TransferBridge, status: Option<&'static str>, uid: &str) -> Arc<TransferHandle> {
        let coordinator = SessionCoordinator::new();
        coordinator.attach(Arc::new(Device { status }));
        coordinator
            .with_folder_locked(MAP_ROOT, |scope| {
                bridge.start_transfer(scope, &format!("/s/message{}", uid), Path::new("/tmp/x"))
            })
            .unwrap()
    }

    #[test]
    fn notification_from_other_thread_completes() {
        let bridge = TransferBridge::new(Duration::from_secs(10));
        let handle = start(&bridge, Some("active"), "1");
        let events = bridge.events();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(!events.notify("xfer-1", "active"));
            assert!(events.notify("xfer-1", "complete"));
        });
        assert_eq!(bridge.await_completion(&handle).unwrap(), PathBuf::from("/tmp/x"));
        notifier.join().unwrap();
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn error_status_fails() {
        let bridge = TransferBridge::new(Duration::from_secs(10));
        let handle = start(&bridge, None, "2");
        assert!(bridge.notify("xfer-2", "error"));
        assert!(!bridge.notify("xfer-2", "complete"));
        assert!(matches!(bridge.await_completion(&handle), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn completed_before_registration_is_seen() {
        let bridge = TransferBridge::new(Duration::from_millis(50));
        let handle = start(&bridge, Some("complete"), "3");
        assert_eq!(handle.state(), TransferState::Complete);
        assert!(bridge.await_completion(&handle).is_ok());
    }

    #[test]
    fn timeout_then_late_notification_is_ignored() {
        let bridge = TransferBridge::new(Duration::from_millis(30));
        let handle = start(&bridge, None, "4");
        let started = Instant::now();
        let err = bridge.await_completion(&handle).unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.events().notify("xfer-4", "complete"));
        assert_eq!(handle.state(), TransferState::TimedOut);
    }
}

/*
 * session.rs
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

//! Session coordinator: owns the MAP session and its single "current folder" cursor.
//!
//! Every call that depends on the current folder runs inside `with_folder_locked`, which holds
//! a re-entrant lock, selects the folder, runs the closure and releases. The folder is selected
//! again on every entry; a cursor value left over from an earlier lock holder is never trusted.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::protocol::map::remote::{FolderEntry, MapSession, MessageListing, TransferId};
use crate::store::StoreError;

/// Root of the message folder tree on every MAP server.
pub const MAP_ROOT: &str = "/telecom/msg";

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Exclusive lock that the owning thread may take again without deadlocking.
#[derive(Debug, Default)]
struct ReentrantLock {
    state: Mutex<LockState>,
    released: Condvar,
}

struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl ReentrantLock {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        ReentrantGuard { lock: self }
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.lock.released.notify_one();
        }
    }
}

#[derive(Default)]
struct Cursor {
    session: Option<Arc<dyn MapSession>>,
    current: Option<String>,
}

/// Serialises folder-context-dependent calls on one MAP session.
#[derive(Default)]
pub struct SessionCoordinator {
    lock: ReentrantLock,
    cursor: Mutex<Cursor>,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a freshly connected session. The cursor starts undefined.
    pub fn attach(&self, session: Arc<dyn MapSession>) {
        let _guard = self.lock.acquire();
        let mut cursor = self.cursor();
        cursor.session = Some(session);
        cursor.current = None;
    }

    /// Remove the session, waiting for any in-progress folder operation. Returns the session
    /// so the caller can close it.
    pub fn detach(&self) -> Option<Arc<dyn MapSession>> {
        let _guard = self.lock.acquire();
        let mut cursor = self.cursor();
        cursor.current = None;
        cursor.session.take()
    }

    pub fn is_connected(&self) -> bool {
        self.cursor().session.is_some()
    }

    /// Last successfully selected folder, None before the first selection or after detach.
    pub fn current_folder(&self) -> Option<String> {
        self.cursor().current.clone()
    }

    pub fn session(&self) -> Result<Arc<dyn MapSession>, StoreError> {
        self.cursor()
            .session
            .clone()
            .ok_or(StoreError::ConnectionUnavailable)
    }

    pub fn session_path(&self) -> Result<String, StoreError> {
        Ok(self.session()?.session_path())
    }

    /// Make `path` the current folder. On failure the cursor keeps its previous value.
    pub fn select_folder(&self, path: &str) -> Result<(), StoreError> {
        let _guard = self.lock.acquire();
        self.select_locked(path).map(|_| ())
    }

    fn select_locked(&self, path: &str) -> Result<Arc<dyn MapSession>, StoreError> {
        let session = self.session()?;
        debug!("selecting folder {}", path);
        session
            .set_folder(path)
            .map_err(|e| StoreError::FolderSelectFailed {
                path: path.to_string(),
                source: Box::new(e),
            })?;
        self.cursor().current = Some(path.to_string());
        Ok(session)
    }

    /// Run `f` with `path` selected and the session held exclusively. Calls may nest on the
    /// same thread; each level sees its own folder selected.
    pub fn with_folder_locked<T, F>(&self, path: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&FolderScope<'_>) -> Result<T, StoreError>,
    {
        let _guard = self.lock.acquire();
        let session = self.select_locked(path)?;
        let scope = FolderScope {
            coordinator: self,
            session,
            path: path.to_string(),
        };
        f(&scope)
    }
}

/// Access to the session while a folder is selected and the coordinator lock is held.
pub struct FolderScope<'a> {
    coordinator: &'a SessionCoordinator,
    session: Arc<dyn MapSession>,
    path: String,
}

impl FolderScope<'_> {
    /// Folder this scope selected.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        self.coordinator
    }

    pub fn session_path(&self) -> String {
        self.session.session_path()
    }

    /// A nested call on this thread may have moved the cursor; put it back first.
    fn ensure_selected(&self) -> Result<(), StoreError> {
        if self.coordinator.current_folder().as_deref() != Some(self.path.as_str()) {
            trace!("cursor moved, reselecting {}", self.path);
            self.coordinator.select_locked(&self.path)?;
        }
        Ok(())
    }

    pub fn list_folders(&self) -> Result<Vec<FolderEntry>, StoreError> {
        self.ensure_selected()?;
        self.session.list_folders()
    }

    pub fn list_messages(&self, folder: &str) -> Result<Vec<MessageListing>, StoreError> {
        self.ensure_selected()?;
        self.session.list_messages(folder)
    }

    pub fn get_message(&self, object_path: &str, destination: &Path) -> Result<TransferId, StoreError> {
        self.ensure_selected()?;
        self.session.get_message(object_path, destination)
    }

    pub fn set_message_property(&self, object_path: &str, name: &str, value: bool) -> Result<(), StoreError> {
        self.ensure_selected()?;
        self.session.set_message_property(object_path, name, value)
    }

    pub fn transfer_status(&self, id: &str) -> Option<String> {
        self.session.transfer_status(id)
    }
}

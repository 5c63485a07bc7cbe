/*
 * folder.rs
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

//! MAP folder: one remote folder below /telecom/msg with its cached summary and bodies.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::localstorage::{DataCache, FolderSummary};
use crate::message_id::{map_message_id, message_object_path, MessageId};
use crate::protocol::map::bmessage::extract_message;
use crate::protocol::map::fetch::FetchDeduplicator;
use crate::protocol::map::reconcile::reconcile;
use crate::protocol::map::session::MAP_ROOT;
use crate::protocol::map::MapStoreState;
use crate::store::{ChangeSet, Flag, Folder, FolderType, MessageInfo, StoreError};

/// Remote property names understood by SetMessageProperty.
const PROP_READ: &str = "Read";
const PROP_DELETED: &str = "Deleted";

/// Called with the folder's full name and each non-empty change set.
pub type ChangeObserver = Box<dyn Fn(&str, &ChangeSet) + Send + Sync>;

pub struct MapFolder {
    state: Arc<MapStoreState>,
    full_name: String,
    folder_id: String,
    summary: Mutex<FolderSummary>,
    cache: DataCache,
    fetches: FetchDeduplicator<String, Vec<u8>>,
    refreshing: AtomicBool,
    synced_generation: AtomicU64,
    filter_recent: bool,
    filter_junk: bool,
    observers: Mutex<Vec<ChangeObserver>>,
}

/// Clears the refresh flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MapFolder {
    /// Open the folder `full_name` (path below the root, e.g. "inbox" or "inbox/work") and load
    /// its cached summary.
    pub(crate) fn open(state: Arc<MapStoreState>, full_name: &str, folder_type: FolderType) -> Result<Self, StoreError> {
        let dir = state.storage_path.join("folders").join(full_name);
        let mut summary = FolderSummary::new(&dir);
        summary.load()?;
        let settings = &state.settings;
        let is_inbox = folder_type == FolderType::Inbox;
        let filter_recent = is_inbox && settings.filter_inbox;
        let filter_junk = settings.filter_junk && (is_inbox || !settings.filter_junk_inbox);
        debug!("opened folder {} ({} cached messages)", full_name, summary.len());
        Ok(Self {
            full_name: full_name.to_string(),
            folder_id: format!("{}/{}", MAP_ROOT, full_name),
            summary: Mutex::new(summary),
            cache: DataCache::new(dir),
            fetches: FetchDeduplicator::new(),
            refreshing: AtomicBool::new(false),
            synced_generation: AtomicU64::new(0),
            filter_recent,
            filter_junk,
            observers: Mutex::new(Vec::new()),
            state,
        })
    }

    fn summary(&self) -> Result<MutexGuard<'_, FolderSummary>, StoreError> {
        self.summary.lock().map_err(|e| StoreError::new(e.to_string()))
    }

    /// Absolute remote path of this folder.
    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// New messages in this folder should go through the host's filters.
    pub fn filter_recent(&self) -> bool {
        self.filter_recent
    }

    /// New messages in this folder should be checked for junk.
    pub fn filter_junk(&self) -> bool {
        self.filter_junk
    }

    /// Host-facing id of a message in this folder.
    pub fn message_id(&self, uid: &str) -> MessageId {
        map_message_id(&self.state.settings.device_address, &self.full_name, uid)
    }

    pub fn description(&self) -> String {
        format!(
            "{}@{}:{}",
            self.state.settings.user,
            self.state.settings.device_label(),
            self.full_name
        )
    }

    pub fn add_observer(&self, observer: ChangeObserver) -> Result<(), StoreError> {
        self.observers
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?
            .push(observer);
        Ok(())
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.summary()?.save()
    }

    /// A message body fetch for `uid` is running.
    pub fn is_fetching(&self, uid: &str) -> bool {
        self.fetches.in_flight(&uid.to_string())
    }

    fn notify(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        match self.observers.lock() {
            Ok(observers) => {
                for observer in observers.iter() {
                    observer(&self.full_name, changes);
                }
            }
            Err(e) => warn!("observers of {} unavailable: {}", self.full_name, e),
        }
    }

    /// Write this folder's counts to the store summary if the folder is known there.
    fn update_counts(&self, unread: usize, total: usize) {
        let store_summary = &self.state.summary;
        if !store_summary.has_folder(&self.folder_id) {
            return;
        }
        let unread = u32::try_from(unread).unwrap_or(u32::MAX);
        let total = u32::try_from(total).unwrap_or(u32::MAX);
        if let Err(e) = store_summary
            .set_folder_unread(&self.folder_id, unread)
            .and_then(|_| store_summary.set_folder_total(&self.folder_id, total))
        {
            warn!("cannot record counts for {}: {}", self.folder_id, e);
        }
    }

    /// Time of the last completed refresh (RFC 3339), as recorded in the store summary.
    pub fn last_refresh(&self) -> Option<String> {
        self.state.summary.get_sync_state(&self.folder_id)
    }

    fn record_refresh(&self) {
        let store_summary = &self.state.summary;
        if !store_summary.has_folder(&self.folder_id) {
            return;
        }
        if let Err(e) = store_summary.set_sync_state(&self.folder_id, &Utc::now().to_rfc3339()) {
            warn!("cannot record refresh of {}: {}", self.folder_id, e);
        }
    }

    /// Fetch bodies of newly listed messages. Failures are left for the next read to retry.
    fn prefetch(&self, uids: &[String]) {
        for uid in uids {
            if let Err(e) = self.get_message(uid) {
                warn!("cannot prefetch {} in {}: {}", uid, self.full_name, e);
            }
        }
    }

    /// Pull the body of `uid` from the device. Runs once per uid however many callers wait.
    fn fetch_remote(&self, uid: &str) -> Result<Vec<u8>, StoreError> {
        // Another owner may have filled the cache between our miss and taking ownership.
        if let Some(data) = self.cache.get(uid)? {
            return Ok(data);
        }
        let staging = self.cache.staging_path(uid)?;
        let transfers = &self.state.transfers;
        let handle = self.state.coordinator.with_folder_locked(&self.folder_id, |scope| {
            let object_path = message_object_path(&scope.session_path(), uid);
            transfers.start_transfer(scope, &object_path, &staging)
        })?;
        let written = transfers.await_completion(&handle)?;
        let raw = fs::read(&written)?;
        if let Err(e) = fs::remove_file(&written) {
            debug!("cannot remove staging file {}: {}", written.display(), e);
        }
        let body = extract_message(&raw)?;
        self.cache.put(uid, &body)?;
        debug!("cached message {} in {} ({} bytes)", uid, self.full_name, body.len());
        Ok(body)
    }

    fn set_remote_flag(&self, uid: &str, flag: Flag, property: &str, on: bool) -> Result<(), StoreError> {
        {
            let summary = self.summary()?;
            let info = summary
                .get(uid)
                .ok_or_else(|| StoreError::NotFound(format!("message {} in {}", uid, self.full_name)))?;
            if info.has_flag(&flag) == on {
                return Ok(());
            }
        }
        self.state.coordinator.with_folder_locked(&self.folder_id, |scope| {
            let object_path = message_object_path(&scope.session_path(), uid);
            scope.set_message_property(&object_path, property, on)
        })?;
        let (unread, total) = {
            let mut summary = self.summary()?;
            let changed = summary.get_mut(uid).map(|info| info.set_flag(flag, on)).unwrap_or(false);
            if changed {
                summary.touch();
            }
            summary.save()?;
            (summary.unread_count(), summary.len())
        };
        self.update_counts(unread, total);
        self.notify(&ChangeSet {
            changed: vec![uid.to_string()],
            ..Default::default()
        });
        Ok(())
    }
}

impl Folder for MapFolder {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn refresh(&self) -> Result<ChangeSet, StoreError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh of {} already running", self.full_name);
            return Ok(ChangeSet::default());
        }
        let _guard = RefreshGuard(&self.refreshing);

        let generation = self.state.generation.load(Ordering::Acquire);
        let listing = self
            .state
            .coordinator
            .with_folder_locked(MAP_ROOT, |scope| scope.list_messages(&self.full_name))?;
        let initial_sync = self.synced_generation.load(Ordering::Acquire) != generation;

        let (changes, unread, total) = {
            let mut summary = self.summary()?;
            let changes = reconcile(&mut summary, &listing, initial_sync);
            summary.save()?;
            (changes, summary.unread_count(), summary.len())
        };
        self.synced_generation.store(generation, Ordering::Release);

        for uid in &changes.removed {
            if let Err(e) = self.cache.remove(uid) {
                warn!("cannot remove cached body of {}: {}", uid, e);
            }
        }
        self.update_counts(unread, total);
        self.record_refresh();
        if let Err(e) = self.state.summary.save() {
            warn!("cannot save folder tree: {}", e);
        }
        info!(
            "refreshed {}{}: {} added, {} changed, {} removed",
            self.full_name,
            if initial_sync { " (initial)" } else { "" },
            changes.added.len(),
            changes.changed.len(),
            changes.removed.len()
        );
        if self.state.settings.stay_synchronized {
            self.prefetch(&changes.added);
        }
        self.notify(&changes);
        Ok(changes)
    }

    fn get_message(&self, uid: &str) -> Result<Vec<u8>, StoreError> {
        if let Some(data) = self.cache.get(uid)? {
            return Ok(data);
        }
        if !self.summary()?.contains(uid) {
            return Err(StoreError::NotFound(format!("message {} in {}", uid, self.full_name)));
        }
        self.fetches.fetch(&uid.to_string(), || self.fetch_remote(uid))
    }

    fn get_message_cached(&self, uid: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.cache.get(uid)
    }

    fn set_read(&self, uid: &str, read: bool) -> Result<(), StoreError> {
        self.set_remote_flag(uid, Flag::Seen, PROP_READ, read)
    }

    fn set_deleted(&self, uid: &str, deleted: bool) -> Result<(), StoreError> {
        self.set_remote_flag(uid, Flag::Deleted, PROP_DELETED, deleted)
    }

    fn list_messages(&self) -> Result<Vec<MessageInfo>, StoreError> {
        Ok(self.summary()?.iter().cloned().collect())
    }

    fn message_count(&self) -> Result<u64, StoreError> {
        Ok(self.summary()?.len() as u64)
    }

    fn unread_count(&self) -> Result<u64, StoreError> {
        Ok(self.summary()?.unread_count() as u64)
    }
}

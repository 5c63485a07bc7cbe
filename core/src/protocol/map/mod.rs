/*
 * mod.rs
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

//! MAP (Bluetooth Message Access Profile) store and folders.
//! Store and folders share one session via MapStoreState; every call that depends on the
//! device's current folder goes through the SessionCoordinator.
//!
//! Trait methods block until the device answers. Message bodies arrive as asynchronous
//! transfers whose completion the transport reports through `TransferEvents`.

pub mod bmessage;
pub mod fetch;
pub mod folder;
pub mod hierarchy;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod transfer;

pub use fetch::FetchDeduplicator;
pub use folder::{ChangeObserver, MapFolder};
pub use hierarchy::{discover, Discovery, FolderNode, FolderTree};
pub use remote::{
    FolderEntry, MapConnector, MapSession, MessageListing, PropertyValue, TransferId,
    TRANSFER_COMPLETE, TRANSFER_ERROR,
};
pub use session::{FolderScope, SessionCoordinator, MAP_ROOT};
pub use transfer::{TransferBridge, TransferEvents, TransferHandle, TransferState, DEFAULT_TRANSFER_TIMEOUT};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::MapSettings;
use crate::localstorage::StoreSummary;
use crate::store::{Folder, FolderFlags, FolderInfo, FolderType, Store, StoreError};

/// StoreSummary file name inside the storage directory.
const FOLDER_TREE_FILE: &str = "folder-tree";
const LAST_SYNC_KEY: &str = "LastSync";

// ======================================================================
// MapStoreState (shared between Store and Folders)
// ======================================================================

pub struct MapStoreState {
    pub(crate) settings: MapSettings,
    pub(crate) storage_path: PathBuf,
    pub(crate) coordinator: SessionCoordinator,
    pub(crate) transfers: Arc<TransferBridge>,
    pub(crate) summary: StoreSummary,
    /// Bumped on every connect; a folder whose last sync saw another value syncs initially.
    pub(crate) generation: AtomicU64,
    connector: Arc<dyn MapConnector>,
    connection_lock: Mutex<()>,
    folder_info_lock: Mutex<()>,
    folders: Mutex<HashMap<String, Arc<MapFolder>>>,
}

impl MapStoreState {
    fn open_folders(&self) -> Result<Vec<Arc<MapFolder>>, StoreError> {
        Ok(self
            .folders
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?
            .values()
            .cloned()
            .collect())
    }
}

// ======================================================================
// MapStore
// ======================================================================

pub struct MapStore {
    state: Arc<MapStoreState>,
}

impl MapStore {
    /// Store for the device in `settings`, caching under `storage_path`. Loads the cached
    /// folder tree; does not connect.
    pub fn new(
        settings: MapSettings,
        storage_path: impl Into<PathBuf>,
        connector: Arc<dyn MapConnector>,
    ) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let summary = StoreSummary::new(storage_path.join(FOLDER_TREE_FILE));
        summary.load()?;
        let transfers = TransferBridge::new(settings.transfer_timeout());
        let state = MapStoreState {
            settings,
            storage_path,
            coordinator: SessionCoordinator::new(),
            transfers,
            summary,
            generation: AtomicU64::new(0),
            connector,
            connection_lock: Mutex::new(()),
            folder_info_lock: Mutex::new(()),
            folders: Mutex::new(HashMap::new()),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn settings(&self) -> &MapSettings {
        &self.state.settings
    }

    pub fn storage_path(&self) -> &Path {
        &self.state.storage_path
    }

    pub fn summary(&self) -> &StoreSummary {
        &self.state.summary
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.state.coordinator
    }

    /// Handle the transport uses to report transfer completion.
    pub fn transfer_events(&self) -> TransferEvents {
        self.state.transfers.events()
    }

    pub fn is_connected(&self) -> bool {
        self.state.coordinator.is_connected()
    }

    /// Open a session to the device and check it can list the message root.
    pub fn connect(&self) -> Result<(), StoreError> {
        let _guard = self
            .state
            .connection_lock
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?;
        if self.state.coordinator.is_connected() {
            return Ok(());
        }
        let settings = &self.state.settings;
        debug!("connecting to {} channel {}", settings.device_address, settings.channel);
        let session = self
            .state
            .connector
            .connect(settings, self.state.transfers.events())?;
        self.state.coordinator.attach(session);
        let check = self
            .state
            .coordinator
            .with_folder_locked(MAP_ROOT, |scope| scope.list_folders());
        if let Err(e) = check {
            warn!("MAP session to {} unusable: {}", settings.device_label(), e);
            if let Some(session) = self.state.coordinator.detach() {
                session.close();
            }
            return Err(e);
        }
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        info!("connected to {}", settings.device_label());
        Ok(())
    }

    /// Save cached state and drop the session.
    pub fn disconnect(&self) -> Result<(), StoreError> {
        let _guard = self
            .state
            .connection_lock
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?;
        self.save()?;
        if let Some(session) = self.state.coordinator.detach() {
            session.close();
            info!("disconnected from {}", self.state.settings.device_label());
        }
        Ok(())
    }

    /// "Messages on <device>" or, in full, "Messages for <user> on <device>".
    pub fn name(&self, brief: bool) -> String {
        let settings = &self.state.settings;
        if brief {
            format!("Messages on {}", settings.device_label())
        } else {
            format!("Messages for {} on {}", settings.user, settings.device_label())
        }
    }

    /// Folder tree, parents before children. Online: walk the device and update the cached
    /// tree. Offline: the cached tree.
    pub fn folder_tree(&self) -> Result<Vec<FolderInfo>, StoreError> {
        let _guard = self
            .state
            .folder_info_lock
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?;
        if !self.state.coordinator.is_connected() {
            return Ok(self.cached_tree());
        }
        let discovery = discover(&self.state.coordinator, MAP_ROOT)?;
        self.sync_tree(&discovery)?;
        let summary = &self.state.summary;
        summary.store_string_val(LAST_SYNC_KEY, &Utc::now().to_rfc3339());
        summary.save()?;
        Ok(discovery
            .tree
            .nodes()
            .iter()
            .map(|node| FolderInfo {
                full_name: node.full_name.clone(),
                display_name: node.display_name.clone(),
                flags: node.flags,
                unread: summary.get_folder_unread(&node.id).unwrap_or(0),
                total: summary.get_folder_total(&node.id).unwrap_or(0),
            })
            .collect())
    }

    fn cached_tree(&self) -> Vec<FolderInfo> {
        let summary = &self.state.summary;
        let mut infos: Vec<FolderInfo> = summary
            .get_folders(None)
            .into_iter()
            .filter_map(|id| {
                let full_name = summary.full_path(&id)?;
                let record = summary.folder_record(&id)?;
                let flags = record.folder_flags();
                let display_name = if flags.folder_type == FolderType::Inbox {
                    "Inbox".to_string()
                } else {
                    record.display_name.clone()
                };
                Some(FolderInfo {
                    full_name,
                    display_name,
                    flags,
                    unread: record.unread,
                    total: record.total,
                })
            })
            .collect();
        infos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        infos
    }

    /// Merge a discovery into the StoreSummary. Folders missing from an incomplete walk stay.
    fn sync_tree(&self, discovery: &Discovery) -> Result<(), StoreError> {
        let summary = &self.state.summary;
        let tree = &discovery.tree;
        for node in tree.nodes() {
            let parent_id = tree.parent_of(node).map(|p| p.id.as_str());
            match summary.folder_record(&node.id) {
                None => summary.new_folder(&node.id, parent_id, &node.name, node.flags, 0),
                Some(record) => {
                    if record.display_name != node.name {
                        summary.set_folder_name(&node.id, &node.name)?;
                    }
                    if record.parent_folder_id.as_deref() != parent_id {
                        summary.set_parent_folder_id(&node.id, parent_id)?;
                    }
                    if record.folder_flags() != node.flags {
                        summary.set_folder_flags(&node.id, node.flags)?;
                    }
                }
            }
        }
        if discovery.is_complete() {
            for id in summary.get_folders(None) {
                if tree.find_by_id(&id).is_none() && summary.remove_folder(&id) {
                    debug!("folder {} is gone", id);
                }
            }
        } else {
            warn!(
                "folder walk incomplete ({} errors), keeping cached folders",
                discovery.errors.len()
            );
        }
        Ok(())
    }

    /// Whether the host should refresh this folder on its schedule.
    pub fn can_refresh_folder(&self, info: &FolderInfo) -> bool {
        if info.flags.no_select {
            return false;
        }
        self.state.settings.check_all || info.flags.folder_type == FolderType::Inbox
    }

    pub fn subscribe_folder(&self, name: &str) -> Result<(), StoreError> {
        if !self.is_connected() {
            warn!("cannot subscribe {} while offline", name);
            return Err(StoreError::ConnectionUnavailable);
        }
        Ok(())
    }

    pub fn unsubscribe_folder(&self, name: &str) -> Result<(), StoreError> {
        if !self.is_connected() {
            warn!("cannot unsubscribe {} while offline", name);
            return Err(StoreError::ConnectionUnavailable);
        }
        Ok(())
    }

    /// Every MAP folder is subscribed.
    pub fn folder_is_subscribed(&self, _name: &str) -> bool {
        true
    }

    fn resolve_folder(&self, name: &str) -> Result<(String, FolderFlags), StoreError> {
        let summary = &self.state.summary;
        let name = name.trim_matches('/');
        let id = summary.id_for_path(name).or_else(|| {
            if name.eq_ignore_ascii_case("inbox") {
                summary.folder_id_for_type(FolderType::Inbox)
            } else {
                None
            }
        });
        let id = id.ok_or_else(|| StoreError::NotFound(format!("folder {}", name)))?;
        let full_name = summary
            .full_path(&id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {}", name)))?;
        let flags = summary.get_folder_flags(&id).unwrap_or_default();
        Ok((full_name, flags))
    }

    /// Open a folder known to the cached tree. The same folder object is returned each time.
    pub fn open_map_folder(&self, name: &str) -> Result<Arc<MapFolder>, StoreError> {
        let (full_name, flags) = self.resolve_folder(name)?;
        let mut folders = self
            .state
            .folders
            .lock()
            .map_err(|e| StoreError::new(e.to_string()))?;
        if let Some(folder) = folders.get(&full_name) {
            return Ok(folder.clone());
        }
        let folder = Arc::new(MapFolder::open(self.state.clone(), &full_name, flags.folder_type)?);
        folders.insert(full_name, folder.clone());
        Ok(folder)
    }

    /// Save the store summary and every open folder's summary.
    pub fn save(&self) -> Result<(), StoreError> {
        for folder in self.state.open_folders()? {
            folder.save()?;
        }
        self.state.summary.save()
    }
}

impl Store for MapStore {
    fn list_folders(&self) -> Result<Vec<FolderInfo>, StoreError> {
        self.folder_tree()
    }

    fn open_folder(&self, name: &str) -> Result<Arc<dyn Folder>, StoreError> {
        let folder: Arc<dyn Folder> = self.open_map_folder(name)?;
        Ok(folder)
    }

    fn hierarchy_delimiter(&self) -> Option<char> {
        Some('/')
    }

    fn default_folder(&self) -> Option<&str> {
        Some("inbox")
    }
}

impl Drop for MapStore {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            warn!("cannot save {}: {}", self.state.storage_path.display(), e);
        }
        if let Some(session) = self.state.coordinator.detach() {
            session.close();
        }
        // Open folders point back at the state.
        if let Ok(mut folders) = self.state.folders.lock() {
            folders.clear();
        }
    }
}

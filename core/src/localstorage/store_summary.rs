/*
 * store_summary.rs
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

//! Store summary: persistent folder id -> display name / parent / flags / counts, plus the
//! derived full-path indexes. Saved as TOML, one table per folder id and a reserved
//! `##storepriv` table for store-wide values.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{FolderFlags, FolderType, StoreError};

const STORE_GROUP_NAME: &str = "##storepriv";
const CURRENT_SUMMARY_VERSION: i64 = 1;

/// One folder's persisted entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    #[serde(rename = "ParentFolderId", default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<String>,
    /// RFC 3339 time of the folder's last completed refresh.
    #[serde(rename = "SyncState", default, skip_serializing_if = "Option::is_none")]
    pub sync_state: Option<String>,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "Unread", default)]
    pub unread: u32,
    #[serde(rename = "Total", default)]
    pub total: u32,
}

impl FolderRecord {
    pub fn folder_flags(&self) -> FolderFlags {
        FolderFlags::from_bits(self.flags)
    }
}

/// Forward (id -> full path) and reverse (full path -> id) indexes over a set of records.
///
/// A full path joins display names from the root with '/'. Both maps always describe the
/// same pairs; when a folder's path changes, every entry under `<old path>/` is recomputed.
#[derive(Debug, Default)]
pub struct FolderPathResolver {
    id_to_path: HashMap<String, String>,
    path_to_id: HashMap<String, String>,
}

impl FolderPathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full path of `id` from the records, or None if it or an ancestor is missing or the
    /// parent chain loops.
    pub fn build_full_name(records: &BTreeMap<String, FolderRecord>, id: &str) -> Option<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id.to_string());
        while let Some(fid) = current {
            if !seen.insert(fid.clone()) {
                warn!("folder parent chain loops at {}", fid);
                return None;
            }
            let record = records.get(&fid)?;
            names.push(record.display_name.clone());
            current = record.parent_folder_id.clone();
        }
        names.reverse();
        Some(names.join("/"))
    }

    pub fn full_path(&self, id: &str) -> Option<&str> {
        self.id_to_path.get(id).map(String::as_str)
    }

    pub fn id_for_path(&self, path: &str) -> Option<&str> {
        self.path_to_id.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_path.is_empty()
    }

    /// Recompute `id`'s path from the records. With `recurse`, every folder whose cached path
    /// lies under the old path is recomputed as well.
    pub fn replace(&mut self, records: &BTreeMap<String, FolderRecord>, id: &str, recurse: bool) {
        let new_path = match Self::build_full_name(records, id) {
            Some(p) => p,
            None => {
                warn!("cannot build full name for folder {}", id);
                let old_path = self.id_to_path.get(id).cloned();
                self.remove(id);
                if let (true, Some(old_path)) = (recurse, old_path) {
                    self.replace_under(records, &format!("{}/", old_path));
                }
                return;
            }
        };
        let mut prefix = None;
        if let Some(old_path) = self.id_to_path.get(id).cloned() {
            // Only drop the reverse entry if it still points at this folder.
            if self.path_to_id.get(&old_path).map(String::as_str) == Some(id) {
                self.path_to_id.remove(&old_path);
                if recurse && old_path != new_path {
                    prefix = Some(format!("{}/", old_path));
                }
            }
        }
        self.path_to_id.insert(new_path.clone(), id.to_string());
        self.id_to_path.insert(id.to_string(), new_path);

        if let Some(prefix) = prefix {
            self.replace_under(records, &prefix);
        }
    }

    /// Recompute every folder whose cached path starts with `prefix`.
    fn replace_under(&mut self, records: &BTreeMap<String, FolderRecord>, prefix: &str) {
        let under: Vec<String> = self
            .path_to_id
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, fid)| fid.clone())
            .collect();
        for fid in under {
            self.replace(records, &fid, false);
        }
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(path) = self.id_to_path.remove(id) {
            if self.path_to_id.get(&path).map(String::as_str) == Some(id) {
                self.path_to_id.remove(&path);
            }
        }
    }

    /// Ids whose path is `path` or lies under it.
    pub fn ids_under(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.id_to_path
            .iter()
            .filter(|(_, p)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Rebuild both indexes from scratch.
    pub fn rebuild(&mut self, records: &BTreeMap<String, FolderRecord>) {
        self.id_to_path.clear();
        self.path_to_id.clear();
        for id in records.keys() {
            match Self::build_full_name(records, id) {
                Some(path) => {
                    self.path_to_id.insert(path.clone(), id.clone());
                    self.id_to_path.insert(id.clone(), path);
                }
                None => warn!("cannot build full name for folder {}", id),
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    folders: BTreeMap<String, FolderRecord>,
    store: toml::Table,
    resolver: FolderPathResolver,
    dirty: bool,
}

impl Inner {
    fn reset(&mut self) {
        self.folders.clear();
        self.store.clear();
        self.store
            .insert("Version".to_string(), toml::Value::Integer(CURRENT_SUMMARY_VERSION));
        self.resolver.rebuild(&self.folders);
        self.dirty = true;
    }

    fn record_mut(&mut self, folder_id: &str) -> Result<&mut FolderRecord, StoreError> {
        self.folders
            .get_mut(folder_id)
            .ok_or_else(|| StoreError::NotFound(format!("folder id {}", folder_id)))
    }

    fn to_toml(&self) -> Result<String, StoreError> {
        let mut doc = toml::Table::new();
        doc.insert(STORE_GROUP_NAME.to_string(), toml::Value::Table(self.store.clone()));
        for (id, record) in &self.folders {
            let value = toml::Value::try_from(record).map_err(|e| StoreError::new(e.to_string()))?;
            doc.insert(id.clone(), value);
        }
        toml::to_string(&doc).map_err(|e| StoreError::new(e.to_string()))
    }
}

/// Thread-safe store summary. Every method takes the internal lock for its own duration only.
#[derive(Debug)]
pub struct StoreSummary {
    inner: Mutex<Inner>,
}

impl StoreSummary {
    /// Empty summary backed by `path`. Call `load` to read an existing file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut inner = Inner {
            path: path.into(),
            folders: BTreeMap::new(),
            store: toml::Table::new(),
            resolver: FolderPathResolver::new(),
            dirty: false,
        };
        inner.reset();
        inner.dirty = false;
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Load from disk. A missing file, unreadable content or a different version leaves the
    /// summary empty (and dirty) so the folder tree is discovered again.
    pub fn load(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.path.exists() {
            inner.reset();
            return Ok(());
        }
        let content = fs::read_to_string(&inner.path)?;
        let doc: toml::Table = match content.parse() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("discarding unreadable store summary {}: {}", inner.path.display(), e);
                inner.reset();
                return Ok(());
            }
        };
        let version = doc
            .get(STORE_GROUP_NAME)
            .and_then(|s| s.get("Version"))
            .and_then(|v| v.as_integer());
        if version != Some(CURRENT_SUMMARY_VERSION) {
            debug!("store summary version {:?} does not match, clearing", version);
            inner.reset();
            return Ok(());
        }
        let mut folders = BTreeMap::new();
        let mut store = toml::Table::new();
        for (key, value) in doc {
            if key.eq_ignore_ascii_case(STORE_GROUP_NAME) {
                if let toml::Value::Table(t) = value {
                    store = t;
                }
                continue;
            }
            match value.try_into::<FolderRecord>() {
                Ok(record) => {
                    folders.insert(key, record);
                }
                Err(e) => warn!("skipping folder {} in store summary: {}", key, e),
            }
        }
        inner.folders = folders;
        inner.store = store;
        let Inner { resolver, folders, .. } = &mut *inner;
        resolver.rebuild(folders);
        inner.dirty = false;
        Ok(())
    }

    /// Write to disk if anything changed since the last load or save.
    pub fn save(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.dirty {
            return Ok(());
        }
        let contents = inner.to_toml()?;
        if let Some(parent) = inner.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = inner.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &inner.path)?;
        inner.dirty = false;
        debug!("saved store summary {}", inner.path.display());
        Ok(())
    }

    pub fn rebuild_hashes(&self) {
        let mut inner = self.lock();
        let Inner { resolver, folders, .. } = &mut *inner;
        resolver.rebuild(folders);
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Add or overwrite a folder entry.
    pub fn new_folder(
        &self,
        folder_id: &str,
        parent_folder_id: Option<&str>,
        display_name: &str,
        flags: FolderFlags,
        total: u32,
    ) {
        let mut inner = self.lock();
        let record = FolderRecord {
            display_name: display_name.to_string(),
            parent_folder_id: parent_folder_id.map(str::to_string),
            sync_state: None,
            flags: flags.bits(),
            unread: 0,
            total,
        };
        inner.folders.insert(folder_id.to_string(), record);
        let Inner { resolver, folders, .. } = &mut *inner;
        resolver.replace(folders, folder_id, false);
        inner.dirty = true;
    }

    /// Rename a folder. Full paths of all its descendants follow.
    pub fn set_folder_name(&self, folder_id: &str, display_name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record_mut(folder_id)?.display_name = display_name.to_string();
        let Inner { resolver, folders, .. } = &mut *inner;
        resolver.replace(folders, folder_id, true);
        inner.dirty = true;
        Ok(())
    }

    /// Move a folder under another parent (None: top level). Descendants follow.
    pub fn set_parent_folder_id(&self, folder_id: &str, parent_id: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record_mut(folder_id)?.parent_folder_id = parent_id.map(str::to_string);
        let Inner { resolver, folders, .. } = &mut *inner;
        resolver.replace(folders, folder_id, true);
        inner.dirty = true;
        Ok(())
    }

    pub fn set_sync_state(&self, folder_id: &str, sync_state: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record_mut(folder_id)?.sync_state = Some(sync_state.to_string());
        inner.dirty = true;
        Ok(())
    }

    pub fn set_folder_flags(&self, folder_id: &str, flags: FolderFlags) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record_mut(folder_id)?.flags = flags.bits();
        inner.dirty = true;
        Ok(())
    }

    pub fn set_folder_unread(&self, folder_id: &str, unread: u32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(folder_id)?;
        if record.unread != unread {
            record.unread = unread;
            inner.dirty = true;
        }
        Ok(())
    }

    pub fn set_folder_total(&self, folder_id: &str, total: u32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner.record_mut(folder_id)?;
        if record.total != total {
            record.total = total;
            inner.dirty = true;
        }
        Ok(())
    }

    /// Store-wide string value in `##storepriv`.
    pub fn store_string_val(&self, key: &str, value: &str) {
        let mut inner = self.lock();
        inner
            .store
            .insert(key.to_string(), toml::Value::String(value.to_string()));
        inner.dirty = true;
    }

    pub fn get_string_val(&self, key: &str) -> Option<String> {
        self.lock()
            .store
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn folder_record(&self, folder_id: &str) -> Option<FolderRecord> {
        self.lock().folders.get(folder_id).cloned()
    }

    pub fn get_folder_name(&self, folder_id: &str) -> Option<String> {
        self.lock().folders.get(folder_id).map(|r| r.display_name.clone())
    }

    pub fn get_parent_folder_id(&self, folder_id: &str) -> Option<String> {
        self.lock()
            .folders
            .get(folder_id)
            .and_then(|r| r.parent_folder_id.clone())
    }

    pub fn get_sync_state(&self, folder_id: &str) -> Option<String> {
        self.lock().folders.get(folder_id).and_then(|r| r.sync_state.clone())
    }

    pub fn get_folder_flags(&self, folder_id: &str) -> Option<FolderFlags> {
        self.lock().folders.get(folder_id).map(FolderRecord::folder_flags)
    }

    pub fn get_folder_unread(&self, folder_id: &str) -> Option<u32> {
        self.lock().folders.get(folder_id).map(|r| r.unread)
    }

    pub fn get_folder_total(&self, folder_id: &str) -> Option<u32> {
        self.lock().folders.get(folder_id).map(|r| r.total)
    }

    /// Full path ("Parent/Child") of a folder.
    pub fn full_path(&self, folder_id: &str) -> Option<String> {
        self.lock().resolver.full_path(folder_id).map(str::to_string)
    }

    /// Folder id for a full path.
    pub fn id_for_path(&self, path: &str) -> Option<String> {
        self.lock().resolver.id_for_path(path).map(str::to_string)
    }

    /// Folder ids, optionally limited to `prefix` and everything under it, in id order.
    pub fn get_folders(&self, prefix: Option<&str>) -> Vec<String> {
        let inner = self.lock();
        inner
            .folders
            .keys()
            .filter(|id| match prefix {
                None | Some("") => true,
                Some(prefix) => match inner.resolver.full_path(id) {
                    Some(path) => {
                        path == prefix
                            || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
                    }
                    None => false,
                },
            })
            .cloned()
            .collect()
    }

    /// Remove a folder and every folder under it. Returns false if the id is unknown.
    pub fn remove_folder(&self, folder_id: &str) -> bool {
        let mut inner = self.lock();
        if !inner.folders.contains_key(folder_id) {
            return false;
        }
        let mut doomed = match inner.resolver.full_path(folder_id) {
            Some(path) => inner.resolver.ids_under(path),
            None => Vec::new(),
        };
        if !doomed.iter().any(|id| id == folder_id) {
            doomed.push(folder_id.to_string());
        }
        for id in &doomed {
            inner.folders.remove(id);
            inner.resolver.remove(id);
        }
        inner.dirty = true;
        true
    }

    /// System folder of the given type (e.g. the inbox).
    pub fn folder_id_for_type(&self, folder_type: FolderType) -> Option<String> {
        if folder_type == FolderType::Normal {
            return None;
        }
        let inner = self.lock();
        inner
            .folders
            .iter()
            .find(|(_, r)| {
                let flags = r.folder_flags();
                flags.folder_type == folder_type && flags.system
            })
            .map(|(id, _)| id.clone())
    }

    pub fn has_folder(&self, folder_id: &str) -> bool {
        self.lock().folders.contains_key(folder_id)
    }
}

/// Open and load the summary at `path`.
pub fn open_store_summary(path: &Path) -> Result<StoreSummary, StoreError> {
    let summary = StoreSummary::new(path);
    summary.load()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(summary: &StoreSummary) {
        summary.new_folder("/telecom/msg/A", None, "A", FolderFlags::default(), 0);
        summary.new_folder("/telecom/msg/A/B", Some("/telecom/msg/A"), "B", FolderFlags::default(), 0);
        summary.new_folder("/telecom/msg/A/B/C", Some("/telecom/msg/A/B"), "C", FolderFlags::default(), 0);
        summary.new_folder("/telecom/msg/AB", None, "AB", FolderFlags::default(), 0);
    }

    #[test]
    fn rename_cascades_to_descendants() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        tree(&summary);
        summary.set_folder_name("/telecom/msg/A", "A2").unwrap();

        assert_eq!(summary.full_path("/telecom/msg/A").as_deref(), Some("A2"));
        assert_eq!(summary.full_path("/telecom/msg/A/B").as_deref(), Some("A2/B"));
        assert_eq!(summary.full_path("/telecom/msg/A/B/C").as_deref(), Some("A2/B/C"));
        assert_eq!(summary.id_for_path("A2/B/C").as_deref(), Some("/telecom/msg/A/B/C"));
        for old in ["A", "A/B", "A/B/C"] {
            assert_eq!(summary.id_for_path(old), None, "stale path {}", old);
        }
        // A sibling sharing the textual prefix is not a descendant.
        assert_eq!(summary.full_path("/telecom/msg/AB").as_deref(), Some("AB"));
    }

    #[test]
    fn reparent_moves_subtree() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        tree(&summary);
        summary
            .set_parent_folder_id("/telecom/msg/A/B", Some("/telecom/msg/AB"))
            .unwrap();
        assert_eq!(summary.full_path("/telecom/msg/A/B/C").as_deref(), Some("AB/B/C"));
        assert_eq!(summary.id_for_path("A/B"), None);
        assert_eq!(summary.get_folders(Some("AB")).len(), 3);
        assert_eq!(summary.get_folders(Some("A")), vec!["/telecom/msg/A".to_string()]);
    }

    #[test]
    fn reparent_to_unknown_parent_drops_subtree_paths() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        tree(&summary);
        summary
            .set_parent_folder_id("/telecom/msg/A", Some("/telecom/msg/ghost"))
            .unwrap();
        for id in ["/telecom/msg/A", "/telecom/msg/A/B", "/telecom/msg/A/B/C"] {
            assert_eq!(summary.full_path(id), None, "stale path for {}", id);
        }
        for old in ["A", "A/B", "A/B/C"] {
            assert_eq!(summary.id_for_path(old), None, "stale id for {}", old);
        }
        assert_eq!(summary.id_for_path("AB").as_deref(), Some("/telecom/msg/AB"));
    }

    #[test]
    fn reparent_into_own_subtree_drops_paths() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        tree(&summary);
        summary
            .set_parent_folder_id("/telecom/msg/A", Some("/telecom/msg/A/B/C"))
            .unwrap();
        assert_eq!(summary.id_for_path("A/B"), None);
        assert_eq!(summary.id_for_path("A/B/C"), None);
        assert_eq!(summary.full_path("/telecom/msg/A/B/C"), None);
    }

    #[test]
    fn setter_on_unknown_folder_fails() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        assert!(matches!(
            summary.set_folder_name("missing", "x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn remove_takes_descendants() {
        let summary = StoreSummary::new("/nonexistent/folder-tree");
        tree(&summary);
        assert!(summary.remove_folder("/telecom/msg/A/B"));
        assert!(!summary.has_folder("/telecom/msg/A/B/C"));
        assert!(summary.has_folder("/telecom/msg/A"));
        assert_eq!(summary.id_for_path("A/B/C"), None);
        assert!(!summary.remove_folder("/telecom/msg/A/B"));
    }

    #[test]
    fn parent_loop_has_no_path() {
        let mut records = BTreeMap::new();
        records.insert(
            "x".to_string(),
            FolderRecord {
                display_name: "X".into(),
                parent_folder_id: Some("y".into()),
                ..Default::default()
            },
        );
        records.insert(
            "y".to_string(),
            FolderRecord {
                display_name: "Y".into(),
                parent_folder_id: Some("x".into()),
                ..Default::default()
            },
        );
        assert_eq!(FolderPathResolver::build_full_name(&records, "x"), None);
        let mut resolver = FolderPathResolver::new();
        resolver.rebuild(&records);
        assert!(resolver.is_empty());
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folder-tree");
        let summary = StoreSummary::new(&path);
        summary.load().unwrap();
        summary.new_folder(
            "/telecom/msg/inbox",
            None,
            "Inbox",
            FolderFlags::of_type(FolderType::Inbox),
            12,
        );
        summary.new_folder("/telecom/msg/inbox/kids", Some("/telecom/msg/inbox"), "kids", FolderFlags::default(), 0);
        summary.set_folder_unread("/telecom/msg/inbox", 3).unwrap();
        summary.store_string_val("LastSync", "2026-01-02T03:04:05+00:00");
        summary.save().unwrap();
        assert!(!summary.is_dirty());

        let reopened = open_store_summary(&path).unwrap();
        assert_eq!(reopened.full_path("/telecom/msg/inbox/kids").as_deref(), Some("Inbox/kids"));
        assert_eq!(reopened.get_folder_unread("/telecom/msg/inbox"), Some(3));
        assert_eq!(reopened.get_folder_total("/telecom/msg/inbox"), Some(12));
        assert_eq!(
            reopened.folder_id_for_type(FolderType::Inbox).as_deref(),
            Some("/telecom/msg/inbox")
        );
        assert_eq!(
            reopened.get_string_val("LastSync").as_deref(),
            Some("2026-01-02T03:04:05+00:00")
        );
    }

    #[test]
    fn version_mismatch_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folder-tree");
        fs::write(
            &path,
            "[\"##storepriv\"]\nVersion = 0\n\n[\"/telecom/msg/inbox\"]\nDisplayName = \"Inbox\"\n",
        )
        .unwrap();
        let summary = open_store_summary(&path).unwrap();
        assert!(summary.get_folders(None).is_empty());
        assert!(summary.is_dirty());
    }

    #[test]
    fn save_skipped_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folder-tree");
        let summary = StoreSummary::new(&path);
        summary.save().unwrap();
        assert!(!path.exists());
    }
}

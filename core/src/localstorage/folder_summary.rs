/*
 * folder_summary.rs
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

//! Per-folder message summary (summary.json): uid -> MessageInfo, with a format version.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{MessageInfo, StoreError};

const SUMMARY_FILE: &str = "summary.json";
const SUMMARY_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SummaryFile {
    version: u32,
    messages: Vec<MessageInfo>,
}

/// Cached message index for one folder. Not synchronised; the owning folder wraps it in a lock.
#[derive(Debug)]
pub struct FolderSummary {
    path: PathBuf,
    messages: BTreeMap<String, MessageInfo>,
    dirty: bool,
}

impl FolderSummary {
    /// Empty summary stored in `folder_dir/summary.json`.
    pub fn new(folder_dir: &Path) -> Self {
        Self {
            path: folder_dir.join(SUMMARY_FILE),
            messages: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load from disk. Missing file or another format version: start empty.
    pub fn load(&mut self) -> Result<(), StoreError> {
        self.messages.clear();
        self.dirty = false;
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read(&self.path)?;
        let file: SummaryFile = match serde_json::from_slice(&data) {
            Ok(f) => f,
            Err(e) => {
                warn!("discarding unreadable summary {}: {}", self.path.display(), e);
                self.dirty = true;
                return Ok(());
            }
        };
        if file.version != SUMMARY_VERSION {
            debug!("summary {} has version {}, starting over", self.path.display(), file.version);
            self.dirty = true;
            return Ok(());
        }
        for info in file.messages {
            self.messages.insert(info.uid.clone(), info);
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = SummaryFile {
            version: SUMMARY_VERSION,
            messages: self.messages.values().cloned().collect(),
        };
        let data = serde_json::to_vec(&file).map_err(|e| StoreError::new(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    pub fn get(&self, uid: &str) -> Option<&MessageInfo> {
        self.messages.get(uid)
    }

    /// Mutable access. Callers that change the entry must call `touch`.
    pub fn get_mut(&mut self, uid: &str) -> Option<&mut MessageInfo> {
        self.messages.get_mut(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.messages.contains_key(uid)
    }

    pub fn insert(&mut self, info: MessageInfo) {
        self.messages.insert(info.uid.clone(), info);
        self.dirty = true;
    }

    pub fn remove(&mut self, uid: &str) -> Option<MessageInfo> {
        let removed = self.messages.remove(uid);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn touch(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn uids(&self) -> Vec<String> {
        self.messages.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageInfo> {
        self.messages.values()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.messages.values().filter(|m| m.is_unread()).count()
    }
}

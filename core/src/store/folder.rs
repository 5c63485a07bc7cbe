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

//! Folder trait: contains messages.
//!
//! Methods block the calling thread until the device answers (or a transfer times out).
//! Hosts call them from worker threads; a folder may be used from several threads at once.

use crate::store::error::StoreError;
use crate::store::kinds::FolderFlags;
use crate::store::message::MessageInfo;

/// Metadata for a folder in a Store.
#[derive(Debug, Clone)]
pub struct FolderInfo {
    /// Slash-separated path of display names, e.g. "inbox" or "Work/Projects".
    pub full_name: String,
    pub display_name: String,
    pub flags: FolderFlags,
    pub unread: u32,
    pub total: u32,
}

/// Result of one refresh: uids added, changed and removed, each in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A Folder contains messages (a MAP folder under /telecom/msg).
pub trait Folder: Send + Sync {
    /// Slash-separated full name of this folder.
    fn full_name(&self) -> &str;

    /// Fetch the remote listing and reconcile it into the local summary.
    fn refresh(&self) -> Result<ChangeSet, StoreError>;

    /// Raw RFC 822 bytes of a message, fetched from the device if not cached.
    fn get_message(&self, uid: &str) -> Result<Vec<u8>, StoreError>;

    /// Raw bytes from the local cache only. Never contacts the device.
    fn get_message_cached(&self, uid: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set_read(&self, uid: &str, read: bool) -> Result<(), StoreError>;

    fn set_deleted(&self, uid: &str, deleted: bool) -> Result<(), StoreError>;

    /// Cached summaries in uid order.
    fn list_messages(&self) -> Result<Vec<MessageInfo>, StoreError>;

    fn message_count(&self) -> Result<u64, StoreError>;

    fn unread_count(&self) -> Result<u64, StoreError>;

    /// Append raw message bytes to this folder. Default: not supported.
    fn append_message(&self, _data: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::not_supported("append message to", self.full_name()))
    }

    /// Copy or move messages to another folder of the same store. Default: not supported.
    fn transfer_messages_to(
        &self,
        _uids: &[&str],
        dest_folder_name: &str,
        delete_originals: bool,
    ) -> Result<(), StoreError> {
        let action = if delete_originals { "move messages to" } else { "copy messages to" };
        Err(StoreError::not_supported(action, dest_folder_name))
    }

    /// Expunge messages marked Deleted. Default: not supported.
    fn expunge(&self) -> Result<(), StoreError> {
        Err(StoreError::not_supported("expunge", self.full_name()))
    }
}

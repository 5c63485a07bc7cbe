/*
 * store.rs
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

//! Store trait: contains hierarchically organised Folders.

use crate::store::error::StoreError;
use crate::store::folder::Folder;
use crate::store::FolderInfo;
use std::sync::Arc;

/// A Store contains hierarchically organised Folders (the message folders of one paired device).
pub trait Store: Send + Sync {
    /// Walk the remote hierarchy and return every folder, parents before children.
    fn list_folders(&self) -> Result<Vec<FolderInfo>, StoreError>;

    /// Open a folder by full name. Folders are shared: opening the same name twice returns the same folder.
    fn open_folder(&self, name: &str) -> Result<Arc<dyn Folder>, StoreError>;

    /// Hierarchy delimiter used in folder names.
    fn hierarchy_delimiter(&self) -> Option<char>;

    /// Default folder name (e.g. "inbox").
    fn default_folder(&self) -> Option<&str> {
        None
    }

    /// Create a folder. Default: not supported.
    fn create_folder(&self, name: &str) -> Result<(), StoreError> {
        Err(StoreError::not_supported("create folder", name))
    }

    /// Delete a folder. Default: not supported.
    fn delete_folder(&self, name: &str) -> Result<(), StoreError> {
        Err(StoreError::not_supported("delete folder", name))
    }

    /// Rename a folder. Default: not supported.
    fn rename_folder(&self, old_name: &str, _new_name: &str) -> Result<(), StoreError> {
        Err(StoreError::not_supported("rename folder", old_name))
    }
}

/*
 * data_cache.rs
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

//! Message body cache. Bodies live at `cur/<hh>/<sha256(uid)>`; transfers are staged under
//! `bt-message/` before the envelope is stripped.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::store::StoreError;

const BODY_DIR: &str = "cur";
const STAGING_DIR: &str = "bt-message";

/// On-disk cache of raw message bodies for one folder.
#[derive(Debug, Clone)]
pub struct DataCache {
    root: PathBuf,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// File name for `uid`: device handles are not trusted as path components.
fn digest(uid: &str) -> String {
    hex(&Sha256::digest(uid.as_bytes()))
}

impl DataCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cached body for `uid` (may not exist).
    pub fn path_for(&self, uid: &str) -> PathBuf {
        let digest = digest(uid);
        self.root.join(BODY_DIR).join(&digest[..2]).join(digest)
    }

    /// Where a transfer for `uid` should write the raw bMessage.
    pub fn staging_path(&self, uid: &str) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(STAGING_DIR);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(digest(uid)))
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.path_for(uid).is_file()
    }

    pub fn get(&self, uid: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(uid);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a body atomically (temp file then rename).
    pub fn put(&self, uid: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_for(uid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Drop a cached body. Missing entries are not an error.
    pub fn remove(&self, uid: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(uid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/*
 * message.rs
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

//! Message summary types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Message flags (e.g. Seen, Flagged).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Custom(String),
}

/// Cached summary of one message in a folder.
///
/// `flags` is what the user sees. `server_flags` is the last state reported by the device;
/// reconciliation compares listings against it, so a local change that the device has not
/// echoed back is not overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: String,
    pub flags: BTreeSet<Flag>,
    pub server_flags: BTreeSet<Flag>,
    pub size: u64,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Seconds since the epoch.
    pub date_sent: Option<i64>,
    pub date_received: Option<i64>,
}

impl MessageInfo {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    /// Set or clear a user-visible flag. Returns true if the flag set changed.
    pub fn set_flag(&mut self, flag: Flag, on: bool) -> bool {
        if on {
            self.flags.insert(flag)
        } else {
            self.flags.remove(&flag)
        }
    }

    pub fn is_unread(&self) -> bool {
        !self.flags.contains(&Flag::Seen) && !self.flags.contains(&Flag::Deleted)
    }
}

/*
 * kinds.rs
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

//! Folder type discriminants and flag bits. Used by the store summary and FFI.

/// Well-known role of a folder. MAP has no folder attributes, so this is derived from names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum FolderType {
    #[default]
    Normal = 0,
    Inbox = 1,
    Outbox = 2,
    Sent = 3,
    Trash = 4,
    Drafts = 5,
}

const TYPE_MASK: u32 = 0xff;
const FLAG_SYSTEM: u32 = 1 << 8;
const FLAG_NO_SELECT: u32 = 1 << 9;

impl FolderType {
    fn from_bits(bits: u32) -> Self {
        match bits & TYPE_MASK {
            1 => FolderType::Inbox,
            2 => FolderType::Outbox,
            3 => FolderType::Sent,
            4 => FolderType::Trash,
            5 => FolderType::Drafts,
            _ => FolderType::Normal,
        }
    }

    /// Best-effort type from a folder's display name. Only a top-level folder can be a system folder.
    pub fn from_name(name: &str, top_level: bool) -> Self {
        if !top_level {
            return FolderType::Normal;
        }
        match name.to_ascii_lowercase().as_str() {
            "inbox" => FolderType::Inbox,
            "outbox" => FolderType::Outbox,
            "sent" => FolderType::Sent,
            "deleted" | "trash" => FolderType::Trash,
            "draft" | "drafts" => FolderType::Drafts,
            _ => FolderType::Normal,
        }
    }
}

/// Folder type plus attribute flags. Persisted as a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FolderFlags {
    pub folder_type: FolderType,
    pub system: bool,
    pub no_select: bool,
}

impl FolderFlags {
    pub fn of_type(folder_type: FolderType) -> Self {
        Self {
            folder_type,
            system: folder_type != FolderType::Normal,
            no_select: false,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = self.folder_type as u32;
        if self.system {
            bits |= FLAG_SYSTEM;
        }
        if self.no_select {
            bits |= FLAG_NO_SELECT;
        }
        bits
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            folder_type: FolderType::from_bits(bits),
            system: bits & FLAG_SYSTEM != 0,
            no_select: bits & FLAG_NO_SELECT != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_only_at_top_level() {
        assert_eq!(FolderType::from_name("INBOX", true), FolderType::Inbox);
        assert_eq!(FolderType::from_name("inbox", false), FolderType::Normal);
        assert_eq!(FolderType::from_name("deleted", true), FolderType::Trash);
    }

    #[test]
    fn flags_survive_integer_form() {
        let f = FolderFlags {
            folder_type: FolderType::Sent,
            system: true,
            no_select: true,
        };
        assert_eq!(FolderFlags::from_bits(f.bits()), f);
        assert_eq!(FolderFlags::from_bits(0), FolderFlags::default());
    }
}

/*
 * message_id.rs
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

//! Stable message identifier (opaque + URI form) and MAP object paths for messages.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

const SEGMENT: &AsciiSet = &CONTROLS.add(b'/').add(b'?').add(b'#').add(b'%').add(b' ');

/// Opaque stable message id. Unique within a store. URI form for cross-reference from the host.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(uri_or_opaque: impl Into<String>) -> Self {
        Self(uri_or_opaque.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build MessageId for a MAP message (device address + folder + handle).
pub fn map_message_id(device_address: &str, folder_full_name: &str, uid: &str) -> MessageId {
    let folder = folder_full_name
        .split('/')
        .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    MessageId::new(format!("map://{}/{}/{}", device_address, folder, uid))
}

/// MAP object path of a message within a session: `<session>/message<uid>`.
pub fn message_object_path(session_path: &str, uid: &str) -> String {
    format!("{}/message{}", session_path.trim_end_matches('/'), uid)
}

/// Handle of a message from its object path. None if the last segment is not `message<uid>`.
pub fn uid_from_object_path(object_path: &str) -> Option<&str> {
    let last = object_path.rsplit('/').next()?;
    let uid = last.strip_prefix("message")?;
    if uid.is_empty() {
        None
    } else {
        Some(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_for_uid() {
        assert_eq!(
            message_object_path("/org/bluez/obex/client/session5", "2147483650"),
            "/org/bluez/obex/client/session5/message2147483650"
        );
    }

    #[test]
    fn uid_from_listing_path() {
        assert_eq!(
            uid_from_object_path("/org/bluez/obex/session5/message2147483650"),
            Some("2147483650")
        );
        assert_eq!(uid_from_object_path("/org/bluez/obex/session5/folder1"), None);
        assert_eq!(uid_from_object_path("/org/bluez/obex/session5/message"), None);
    }

    #[test]
    fn message_id_encodes_folder_segments() {
        let id = map_message_id("00:11:22:33:44:55", "Work/My Projects", "42");
        assert_eq!(id.as_str(), "map://00:11:22:33:44:55/Work/My%20Projects/42");
    }
}

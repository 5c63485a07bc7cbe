/*
 * uri.rs
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

//! Store and folder URIs. A store is `map://<device address>/<channel>`; a folder appends its
//! percent-encoded full name as one path segment.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Path segment safe set: encode / ? # [ ] @ % and space so the full name stays one segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'%')
    .add(b' ');

/// MAP store URI: map://00:11:22:33:44:55/16.
pub fn map_store_uri(device_address: &str, channel: u16) -> String {
    format!("map://{}/{}", device_address.to_ascii_uppercase(), channel)
}

/// Folder URI: store URI + "/" + percent-encoded full name.
pub fn folder_uri(store_uri: &str, full_name: &str) -> String {
    let store = store_uri.trim_end_matches('/');
    format!("{}/{}", store, utf8_percent_encode(full_name, PATH_SEGMENT))
}

/// Full name from a folder URI created by `folder_uri`. None if the URI is not under the store.
pub fn folder_name_from_uri(store_uri: &str, uri: &str) -> Option<String> {
    let store = store_uri.trim_end_matches('/');
    let rest = uri.strip_prefix(store)?.strip_prefix('/')?;
    percent_decode_str(rest).decode_utf8().ok().map(|s| s.into_owned())
}

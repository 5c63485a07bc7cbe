/*
 * bmessage.rs
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

//! bMessage envelope (BEGIN:BMSG ... END:BMSG). Devices wrap the RFC 822 message in it; the
//! cache keeps only the content between BEGIN:MSG and END:MSG.

use crate::store::StoreError;

const BEGIN_MSG: &[u8] = b"BEGIN:MSG";
const END_MSG: &[u8] = b"END:MSG";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Index just past the end of the line containing `pos`.
fn next_line(data: &[u8], pos: usize) -> usize {
    match data[pos..].iter().position(|&b| b == b'\n') {
        Some(p) => pos + p + 1,
        None => data.len(),
    }
}

/// Drop the line break that precedes a closing marker.
fn trim_line_break(mut content: &[u8]) -> &[u8] {
    if content.ends_with(b"\n") {
        content = &content[..content.len() - 1];
    }
    if content.ends_with(b"\r") {
        content = &content[..content.len() - 1];
    }
    content
}

/// The message enclosed in a bMessage. Data without a BEGIN:MSG marker is cut at END:MSG (or
/// returned whole). A BEGIN:MSG without its END:MSG is a truncated transfer.
pub fn extract_message(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    match find(data, BEGIN_MSG, 0) {
        Some(begin) => {
            let start = next_line(data, begin);
            let end = find(data, END_MSG, start).ok_or_else(|| {
                StoreError::Protocol("bMessage has BEGIN:MSG without END:MSG".to_string())
            })?;
            Ok(trim_line_break(&data[start..end]).to_vec())
        }
        None => match find(data, END_MSG, 0) {
            Some(end) => Ok(trim_line_break(&data[..end]).to_vec()),
            None => Ok(data.to_vec()),
        },
    }
}

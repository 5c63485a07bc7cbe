/*
 * reconcile.rs
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

//! Summary reconciliation: diff a remote message listing against the cached folder summary.
//!
//! New handles become summary entries. For known handles the remote Read and Priority
//! properties are compared with the entry's server flags, not its user-visible flags, so a
//! local change the device has not echoed yet is left alone. Entries missing from the listing
//! are removed only on the initial sync after connecting.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, warn};

use crate::localstorage::FolderSummary;
use crate::message_id::uid_from_object_path;
use crate::protocol::map::remote::MessageListing;
use crate::store::{ChangeSet, Flag, MessageInfo};

/// Listing properties that map onto flags.
const FLAG_PROPERTIES: [(&str, Flag); 2] = [("Read", Flag::Seen), ("Priority", Flag::Flagged)];

/// Parse a MAP timestamp ("20120913T175106", optionally with a UTC offset) to epoch seconds.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y%m%dT%H%M%S%z") {
        return Some(dt.timestamp());
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// "Name <address>", "Name" or "<address>".
fn format_address(name: Option<&str>, address: Option<&str>) -> Option<String> {
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    let address = address.map(str::trim).filter(|s| !s.is_empty());
    match (name, address) {
        (Some(n), Some(a)) => Some(format!("{} <{}>", n, a)),
        (Some(n), None) => Some(n.to_string()),
        (None, Some(a)) => Some(format!("<{}>", a)),
        (None, None) => None,
    }
}

/// Pair ';'-separated names and addresses by position and join with ", ".
fn format_recipients(names: Option<&str>, addresses: Option<&str>) -> Option<String> {
    let split = |s: Option<&str>| -> Vec<String> {
        s.map(|s| s.split(';').map(|p| p.trim().to_string()).collect())
            .unwrap_or_default()
    };
    let names = split(names);
    let addresses = split(addresses);
    let count = names.len().max(addresses.len());
    let joined: Vec<String> = (0..count)
        .filter_map(|i| format_address(names.get(i).map(String::as_str), addresses.get(i).map(String::as_str)))
        .collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join(", "))
    }
}

fn new_entry(uid: &str, item: &MessageListing) -> MessageInfo {
    let mut info = MessageInfo::new(uid);
    for (prop, flag) in FLAG_PROPERTIES.iter() {
        if item.bool_prop(prop).unwrap_or(false) {
            info.flags.insert(flag.clone());
            info.server_flags.insert(flag.clone());
        }
    }
    info.size = item.u64_prop("Size").unwrap_or(0);
    info.subject = item.str_prop("Subject").map(str::to_string);
    info.from = format_address(item.str_prop("Sender"), item.str_prop("SenderAddress"));
    info.to = format_recipients(item.str_prop("Recipient"), item.str_prop("RecipientAddress"));
    if let Some(ts) = item.str_prop("Timestamp").and_then(parse_timestamp) {
        info.date_sent = Some(ts);
        info.date_received = Some(ts);
    }
    info
}

/// Apply remote flag state to an existing entry. Returns (entry touched, visible flags changed).
fn update_entry(info: &mut MessageInfo, item: &MessageListing) -> (bool, bool) {
    let mut touched = false;
    let mut visible = false;
    for (prop, flag) in FLAG_PROPERTIES.iter() {
        let remote = item.bool_prop(prop).unwrap_or(false);
        if info.server_flags.contains(flag) == remote {
            continue;
        }
        touched = true;
        if remote {
            info.server_flags.insert(flag.clone());
        } else {
            info.server_flags.remove(flag);
        }
        if info.set_flag(flag.clone(), remote) {
            visible = true;
        }
    }
    (touched, visible)
}

/// Merge `listing` into `summary`. Only `initial_sync` passes remove cached entries that the
/// listing no longer contains.
pub fn reconcile(summary: &mut FolderSummary, listing: &[MessageListing], initial_sync: bool) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut listed: HashSet<&str> = HashSet::new();

    for item in listing {
        let Some(uid) = uid_from_object_path(&item.object_path) else {
            warn!("ignoring listing entry {}", item.object_path);
            continue;
        };
        if !listed.insert(uid) {
            continue;
        }
        match summary.get_mut(uid) {
            Some(info) => {
                let (touched, visible) = update_entry(info, item);
                if touched {
                    summary.touch();
                }
                if visible {
                    changes.changed.push(uid.to_string());
                }
            }
            None => {
                summary.insert(new_entry(uid, item));
                changes.added.push(uid.to_string());
            }
        }
    }

    if initial_sync {
        for uid in summary.uids() {
            if !listed.contains(uid.as_str()) {
                summary.remove(&uid);
                changes.removed.push(uid);
            }
        }
    }

    debug!(
        "reconciled {} listed: {} added, {} changed, {} removed",
        listed.len(),
        changes.added.len(),
        changes.changed.len(),
        changes.removed.len()
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::map::remote::PropertyValue;
    use std::path::Path;

    fn listed(uid: &str) -> MessageListing {
        MessageListing::new(format!("/org/bluez/obex/session5/message{}", uid))
    }

    fn summary_with(uids: &[&str]) -> FolderSummary {
        let mut s = FolderSummary::new(Path::new("/nonexistent"));
        for uid in uids {
            s.insert(MessageInfo::new(*uid));
        }
        s
    }

    #[test]
    fn initial_sync_removes_missing() {
        let mut s = summary_with(&["1", "2", "3", "4"]);
        let listing = vec![listed("1"), listed("2"), listed("3")];
        let changes = reconcile(&mut s, &listing, true);
        assert_eq!(changes.removed, vec!["4".to_string()]);
        assert!(changes.added.is_empty());
        assert!(!s.contains("4"));
    }

    #[test]
    fn later_sync_keeps_missing() {
        let mut s = summary_with(&["1", "2", "3", "4"]);
        let listing = vec![listed("1"), listed("2"), listed("3")];
        let changes = reconcile(&mut s, &listing, false);
        assert!(changes.is_empty());
        assert!(s.contains("4"));
    }

    #[test]
    fn remote_read_marks_seen() {
        let mut s = summary_with(&["7"]);
        s.get_mut("7").unwrap().set_flag(Flag::Flagged, false);
        let before = s.get("7").unwrap().clone();
        let listing = vec![listed("7").with("Read", PropertyValue::Bool(true))];
        let changes = reconcile(&mut s, &listing, false);
        assert_eq!(changes.changed, vec!["7".to_string()]);
        let after = s.get("7").unwrap();
        assert!(after.has_flag(&Flag::Seen));
        assert!(!after.has_flag(&Flag::Flagged));
        assert_eq!(after.subject, before.subject);
        assert_eq!(after.size, before.size);
        assert_eq!(after.flags.len(), 1);
    }

    #[test]
    fn unechoed_local_change_survives() {
        let mut s = summary_with(&["9"]);
        // User marked read locally; the device still reports unread.
        s.get_mut("9").unwrap().set_flag(Flag::Seen, true);
        let listing = vec![listed("9").with("Read", PropertyValue::Bool(false))];
        let changes = reconcile(&mut s, &listing, false);
        assert!(changes.is_empty());
        assert!(s.get("9").unwrap().has_flag(&Flag::Seen));
    }

    #[test]
    fn new_message_from_properties() {
        let mut s = summary_with(&[]);
        let listing = vec![listed("20")
            .with("Read", PropertyValue::Bool(false))
            .with("Priority", PropertyValue::Bool(true))
            .with("Size", PropertyValue::U64(39))
            .with("Subject", PropertyValue::Str("Multiple recipients".into()))
            .with("Sender", PropertyValue::Str("Srini".into()))
            .with("SenderAddress", PropertyValue::Str("sragavan@gmail.com".into()))
            .with("Recipient", PropertyValue::Str("meego; Srini".into()))
            .with("RecipientAddress", PropertyValue::Str("meego@gmail.com;sragavan@gmail.com".into()))
            .with("Timestamp", PropertyValue::Str("20120913T175106".into()))];
        let changes = reconcile(&mut s, &listing, true);
        assert_eq!(changes.added, vec!["20".to_string()]);
        let info = s.get("20").unwrap();
        assert!(info.has_flag(&Flag::Flagged));
        assert!(!info.has_flag(&Flag::Seen));
        assert!(info.server_flags.contains(&Flag::Flagged));
        assert_eq!(info.size, 39);
        assert_eq!(info.from.as_deref(), Some("Srini <sragavan@gmail.com>"));
        assert_eq!(
            info.to.as_deref(),
            Some("meego <meego@gmail.com>, Srini <sragavan@gmail.com>")
        );
        assert_eq!(info.date_sent, Some(1347558666));
    }

    #[test]
    fn timestamps_with_offsets() {
        assert_eq!(parse_timestamp("20120913T175106Z"), Some(1347558666));
        assert_eq!(parse_timestamp("20120913T185106+0100"), Some(1347558666));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}

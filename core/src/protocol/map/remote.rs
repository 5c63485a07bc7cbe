/*
 * remote.rs
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

//! The remote MAP session as seen by the engine. A transport (Bluetooth OBEX client, or a
//! scripted device in tests) implements `MapSession`; the engine never talks to the wire.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::MapSettings;
use crate::protocol::map::transfer::TransferEvents;
use crate::store::StoreError;

/// Identifier of an asynchronous transfer, as returned by `get_message`.
pub type TransferId = String;

/// Status string of a finished transfer.
pub const TRANSFER_COMPLETE: &str = "complete";
/// Status string of a failed transfer.
pub const TRANSFER_ERROR: &str = "error";

/// One child folder in a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
}

impl FolderEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A message property value from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    U64(u64),
    Str(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// One message in a message listing: its object path plus named properties
/// (Read, Priority, Size, Subject, Sender, SenderAddress, Recipient, RecipientAddress, Timestamp...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageListing {
    pub object_path: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl MessageListing {
    pub fn new(object_path: impl Into<String>) -> Self {
        Self {
            object_path: object_path.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: &str, value: PropertyValue) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn bool_prop(&self, name: &str) -> Option<bool> {
        self.properties.get(name).and_then(PropertyValue::as_bool)
    }

    pub fn u64_prop(&self, name: &str) -> Option<u64> {
        self.properties.get(name).and_then(PropertyValue::as_u64)
    }

    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(PropertyValue::as_str)
    }
}

/// An open MAP session on one device. Calls block until the device answers.
///
/// Every call except `session_path`, `transfer_status` and `close` acts on (or changes) the
/// device's single current folder, so callers serialise them through the session coordinator.
pub trait MapSession: Send + Sync {
    /// Object path of this session; message objects live beneath it.
    fn session_path(&self) -> String;

    /// Change the current folder. `path` is absolute, e.g. "/telecom/msg/inbox".
    fn set_folder(&self, path: &str) -> Result<(), StoreError>;

    /// Child folders of the current folder.
    fn list_folders(&self) -> Result<Vec<FolderEntry>, StoreError>;

    /// Messages of `folder`, relative to the current folder.
    fn list_messages(&self, folder: &str) -> Result<Vec<MessageListing>, StoreError>;

    /// Start downloading a message object into `destination`. Returns at once with the
    /// transfer id; completion is reported later through `TransferEvents`.
    fn get_message(&self, object_path: &str, destination: &Path) -> Result<TransferId, StoreError>;

    /// Set a boolean message property ("Read", "Deleted").
    fn set_message_property(&self, object_path: &str, name: &str, value: bool) -> Result<(), StoreError>;

    /// Current status of a transfer ("queued", "active", "complete", "error"), or None if the
    /// transport no longer knows it.
    fn transfer_status(&self, id: &str) -> Option<String>;

    /// Tear the session down. Further calls fail.
    fn close(&self) {}
}

/// Creates sessions. `events` is where the transport must report transfer status changes.
pub trait MapConnector: Send + Sync {
    fn connect(&self, settings: &MapSettings, events: TransferEvents) -> Result<Arc<dyn MapSession>, StoreError>;
}

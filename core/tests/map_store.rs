/*
 * map_store.rs
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

//! MapStore and MapFolder against a scripted device.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use mapsync_core::config::MapSettings;
use mapsync_core::protocol::map::{
    FolderEntry, MapConnector, MapFolder, MapSession, MapStore, MessageListing, PropertyValue,
    TransferEvents, TransferId, MAP_ROOT,
};
use mapsync_core::store::{Flag, Folder, FolderType, Store, StoreError};
use tempfile::TempDir;

const SESSION: &str = "/org/bluez/obex/client/session1";

/// A phone with a few folders. Every remote call is logged; calls that depend on the current
/// folder log it too, so tests can check selection happened first.
struct FakeDevice {
    tree: HashMap<String, Vec<String>>,
    listings: Mutex<HashMap<String, Vec<MessageListing>>>,
    current: Mutex<Option<String>>,
    log: Mutex<Vec<String>>,
    events: Mutex<Option<TransferEvents>>,
    statuses: Arc<Mutex<HashMap<String, String>>>,
    auto_complete: AtomicBool,
    broken_root: AtomicBool,
    transfers: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeDevice {
    fn new() -> Arc<Self> {
        let mut tree = HashMap::new();
        tree.insert(
            MAP_ROOT.to_string(),
            vec!["inbox", "sent", "msg", "Work"].into_iter().map(String::from).collect(),
        );
        tree.insert(format!("{}/Work", MAP_ROOT), vec!["Projects".to_string()]);
        let device = Arc::new(Self {
            tree,
            listings: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            auto_complete: AtomicBool::new(true),
            broken_root: AtomicBool::new(false),
            transfers: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        device.set_listing("inbox", &[("1", false), ("2", true), ("3", false)]);
        device
    }

    fn set_listing(&self, folder: &str, messages: &[(&str, bool)]) {
        let listing = messages
            .iter()
            .map(|(uid, read)| {
                MessageListing::new(format!("{}/message{}", SESSION, uid))
                    .with("Read", PropertyValue::Bool(*read))
                    .with("Subject", PropertyValue::Str(format!("Message {}", uid)))
                    .with("Sender", PropertyValue::Str("Srini".to_string()))
                    .with("SenderAddress", PropertyValue::Str("sragavan@gmail.com".to_string()))
                    .with("Size", PropertyValue::U64(64))
                    .with("Timestamp", PropertyValue::Str("20120913T190426+0530".to_string()))
            })
            .collect();
        self.listings.lock().unwrap().insert(folder.to_string(), listing);
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn current(&self) -> String {
        self.current.lock().unwrap().clone().unwrap_or_default()
    }

    fn known(&self, path: &str) -> bool {
        self.tree.contains_key(path)
            || self.tree.iter().any(|(parent, children)| {
                children.iter().any(|c| format!("{}/{}", parent, c) == path)
            })
    }
}

fn bmessage(uid: &str) -> String {
    format!(
        "BEGIN:BMSG\r\nVERSION:1.0\r\nSTATUS:UNREAD\r\nTYPE:EMAIL\r\nFOLDER:TELECOM/MSG/INBOX\r\n\
         BEGIN:BENV\r\nBEGIN:BBODY\r\nCHARSET:UTF-8\r\nLENGTH:60\r\nBEGIN:MSG\r\n\
         Subject: Message {}\r\n\r\nBody of {}\r\nEND:MSG\r\nEND:BBODY\r\nEND:BENV\r\nEND:BMSG\r\n",
        uid, uid
    )
}

fn expected_body(uid: &str) -> Vec<u8> {
    format!("Subject: Message {}\r\n\r\nBody of {}", uid, uid).into_bytes()
}

impl MapSession for FakeDevice {
    fn session_path(&self) -> String {
        SESSION.to_string()
    }

    fn set_folder(&self, path: &str) -> Result<(), StoreError> {
        self.record(format!("select {}", path));
        if !self.known(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        *self.current.lock().unwrap() = Some(path.to_string());
        Ok(())
    }

    fn list_folders(&self) -> Result<Vec<FolderEntry>, StoreError> {
        let current = self.current();
        self.record(format!("list folders in {}", current));
        if current == MAP_ROOT && self.broken_root.load(Ordering::SeqCst) {
            return Err(StoreError::Protocol("GetFolderListing failed".to_string()));
        }
        Ok(self
            .tree
            .get(&current)
            .map(|children| children.iter().map(FolderEntry::new).collect())
            .unwrap_or_default())
    }

    fn list_messages(&self, folder: &str) -> Result<Vec<MessageListing>, StoreError> {
        self.record(format!("list {} in {}", folder, self.current()));
        Ok(self.listings.lock().unwrap().get(folder).cloned().unwrap_or_default())
    }

    fn get_message(&self, object_path: &str, destination: &Path) -> Result<TransferId, StoreError> {
        self.record(format!("get {} in {}", object_path, self.current()));
        let n = self.transfers.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}/transfer{}", SESSION, n);
        let uid = object_path.rsplit("message").next().unwrap_or_default().to_string();
        fs::write(destination, bmessage(&uid))?;
        if self.auto_complete.load(Ordering::SeqCst) {
            let events = self.events.lock().unwrap().clone().expect("connected");
            let statuses = self.statuses.clone();
            let id = id.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                statuses.lock().unwrap().insert(id.clone(), "complete".to_string());
                events.notify(&id, "complete");
            });
        }
        Ok(id)
    }

    fn set_message_property(&self, object_path: &str, name: &str, value: bool) -> Result<(), StoreError> {
        self.record(format!("set {} {}={} in {}", object_path, name, value, self.current()));
        Ok(())
    }

    fn transfer_status(&self, id: &str) -> Option<String> {
        self.statuses.lock().unwrap().get(id).cloned()
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeConnector(Arc<FakeDevice>);

impl MapConnector for FakeConnector {
    fn connect(&self, _settings: &MapSettings, events: TransferEvents) -> Result<Arc<dyn MapSession>, StoreError> {
        *self.0.events.lock().unwrap() = Some(events);
        *self.0.current.lock().unwrap() = None;
        let session: Arc<dyn MapSession> = self.0.clone();
        Ok(session)
    }
}

fn settings() -> MapSettings {
    MapSettings {
        device_name: "Pixel".to_string(),
        device_address: "00:11:22:33:44:55".to_string(),
        channel: 16,
        user: "sam".to_string(),
        transfer_timeout_secs: 1,
        ..Default::default()
    }
}

fn store(dir: &TempDir, device: &Arc<FakeDevice>) -> MapStore {
    MapStore::new(settings(), dir.path(), Arc::new(FakeConnector(device.clone()))).unwrap()
}

/// Connected store whose folder tree has been walked once.
fn online(dir: &TempDir) -> (Arc<FakeDevice>, MapStore) {
    let device = FakeDevice::new();
    let store = store(dir, &device);
    store.connect().unwrap();
    store.list_folders().unwrap();
    device.clear_log();
    (device, store)
}

fn inbox(store: &MapStore) -> Arc<MapFolder> {
    store.open_map_folder("inbox").unwrap()
}

#[test]
fn folder_tree_skips_reserved_names() {
    let dir = TempDir::new().unwrap();
    let device = FakeDevice::new();
    let store = store(&dir, &device);
    store.connect().unwrap();
    let folders = store.list_folders().unwrap();
    let names: Vec<&str> = folders.iter().map(|f| f.full_name.as_str()).collect();
    assert_eq!(names, vec!["inbox", "sent", "Work", "Work/Projects"]);
    assert_eq!(folders[0].display_name, "Inbox");
    assert_eq!(folders[0].flags.folder_type, FolderType::Inbox);
    assert_eq!(folders[1].flags.folder_type, FolderType::Sent);
    assert_eq!(folders[3].flags.folder_type, FolderType::Normal);
    assert!(store.summary().get_string_val("LastSync").is_some());
    assert_eq!(
        store.summary().folder_id_for_type(FolderType::Inbox).as_deref(),
        Some("/telecom/msg/inbox")
    );
    assert_eq!(store.name(true), "Messages on Pixel");
    assert_eq!(store.name(false), "Messages for sam on Pixel");
}

#[test]
fn failed_root_listing_fails_connect() {
    let dir = TempDir::new().unwrap();
    let device = FakeDevice::new();
    device.broken_root.store(true, Ordering::SeqCst);
    let store = store(&dir, &device);
    assert!(store.connect().is_err());
    assert!(!store.is_connected());
    assert_eq!(device.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn every_remote_call_follows_its_selection() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();
    folder.get_message("1").unwrap();
    folder.set_read("1", true).unwrap();
    let log = device.log();
    assert_eq!(
        log,
        vec![
            "select /telecom/msg".to_string(),
            "list inbox in /telecom/msg".to_string(),
            "select /telecom/msg/inbox".to_string(),
            format!("get {}/message1 in /telecom/msg/inbox", SESSION),
            "select /telecom/msg/inbox".to_string(),
            format!("set {}/message1 Read=true in /telecom/msg/inbox", SESSION),
        ]
    );
}

#[test]
fn concurrent_fetches_share_one_transfer() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let folder = folder.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                folder.get_message("2")
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap().unwrap(), expected_body("2"));
    }
    assert_eq!(device.transfers.load(Ordering::SeqCst), 1);
    assert!(!folder.is_fetching("2"));
    assert_eq!(folder.get_message_cached("2").unwrap(), Some(expected_body("2")));
    // Served from the cache without another transfer.
    folder.get_message("2").unwrap();
    assert_eq!(device.transfers.load(Ordering::SeqCst), 1);
}

#[test]
fn timed_out_fetch_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();

    device.auto_complete.store(false, Ordering::SeqCst);
    let err = folder.get_message("3").unwrap_err();
    assert!(err.is_timeout(), "{}", err);
    // The device finally reports the abandoned transfer; nobody is waiting for it.
    let late = format!("{}/transfer1", SESSION);
    assert!(!store.transfer_events().notify(&late, "complete"));
    assert_eq!(folder.get_message_cached("3").unwrap(), None);

    device.auto_complete.store(true, Ordering::SeqCst);
    assert_eq!(folder.get_message("3").unwrap(), expected_body("3"));
    assert_eq!(device.transfers.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_uid_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();
    device.clear_log();
    assert!(matches!(folder.get_message("99"), Err(StoreError::NotFound(_))));
    assert!(matches!(folder.set_read("99", true), Err(StoreError::NotFound(_))));
    assert!(device.log().is_empty());
}

#[test]
fn absence_removes_only_on_first_sync_of_a_connection() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    let first = folder.refresh().unwrap();
    assert_eq!(first.added, vec!["1", "2", "3"]);

    device.set_listing("inbox", &[("1", false), ("2", true)]);
    let second = folder.refresh().unwrap();
    assert!(second.is_empty());
    assert_eq!(folder.message_count().unwrap(), 3);

    store.disconnect().unwrap();
    store.connect().unwrap();
    let third = folder.refresh().unwrap();
    assert_eq!(third.removed, vec!["3"]);
    assert_eq!(folder.message_count().unwrap(), 2);
}

#[test]
fn removed_message_drops_cached_body() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();
    folder.get_message("3").unwrap();

    device.set_listing("inbox", &[("1", false), ("2", true)]);
    store.disconnect().unwrap();
    store.connect().unwrap();
    folder.refresh().unwrap();
    assert_eq!(folder.get_message_cached("3").unwrap(), None);
}

#[test]
fn remote_read_state_reaches_summary() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();
    assert_eq!(folder.unread_count().unwrap(), 2);

    device.set_listing("inbox", &[("1", true), ("2", true), ("3", false)]);
    let changes = folder.refresh().unwrap();
    assert_eq!(changes.changed, vec!["1"]);
    assert_eq!(folder.unread_count().unwrap(), 1);
    assert_eq!(store.summary().get_folder_unread("/telecom/msg/inbox"), Some(1));
    assert_eq!(store.summary().get_folder_total("/telecom/msg/inbox"), Some(3));

    let info = folder
        .list_messages()
        .unwrap()
        .into_iter()
        .find(|m| m.uid == "1")
        .unwrap();
    assert!(info.has_flag(&Flag::Seen));
    assert_eq!(info.subject.as_deref(), Some("Message 1"));
    assert_eq!(info.from.as_deref(), Some("Srini <sragavan@gmail.com>"));
    assert_eq!(info.date_received, Some(1347543266));
}

#[test]
fn flag_is_pushed_only_when_it_changes() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    folder.refresh().unwrap();
    device.clear_log();

    folder.set_read("2", true).unwrap();
    assert!(device.log().is_empty());

    folder.set_read("1", true).unwrap();
    folder.set_read("1", true).unwrap();
    folder.set_deleted("3", true).unwrap();
    let sets: Vec<String> = device.log().into_iter().filter(|l| l.starts_with("set ")).collect();
    assert_eq!(
        sets,
        vec![
            format!("set {}/message1 Read=true in /telecom/msg/inbox", SESSION),
            format!("set {}/message3 Deleted=true in /telecom/msg/inbox", SESSION),
        ]
    );
    assert_eq!(folder.unread_count().unwrap(), 0);

    // The device has not echoed the change yet; the local flag survives the next listing.
    let changes = folder.refresh().unwrap();
    assert!(changes.changed.is_empty());
    let info = folder
        .list_messages()
        .unwrap()
        .into_iter()
        .find(|m| m.uid == "1")
        .unwrap();
    assert!(info.has_flag(&Flag::Seen));
}

#[test]
fn unsupported_operations_stay_local() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);

    let err = store.create_folder("Work").unwrap_err();
    assert_eq!(err.to_string(), "Cannot create folder 'Work'. MAP doesn't support it");
    assert!(matches!(store.delete_folder("Work"), Err(StoreError::NotSupported { .. })));
    assert!(matches!(store.rename_folder("Work", "Play"), Err(StoreError::NotSupported { .. })));
    assert!(matches!(folder.append_message(b"Subject: x\r\n\r\n"), Err(StoreError::NotSupported { .. })));
    let err = folder.transfer_messages_to(&["1"], "sent", true).unwrap_err();
    assert_eq!(err.to_string(), "Cannot move messages to 'sent'. MAP doesn't support it");
    assert!(matches!(folder.expunge(), Err(StoreError::NotSupported { .. })));
    assert!(device.log().is_empty());
}

#[test]
fn offline_store_serves_cache() {
    let dir = TempDir::new().unwrap();
    {
        let (_device, store) = online(&dir);
        let folder = inbox(&store);
        folder.refresh().unwrap();
        folder.get_message("1").unwrap();
        store.disconnect().unwrap();
    }

    let device = FakeDevice::new();
    let store = store(&dir, &device);
    let names: Vec<String> = store
        .list_folders()
        .unwrap()
        .into_iter()
        .map(|f| f.full_name)
        .collect();
    assert_eq!(names, vec!["Work", "Work/Projects", "inbox", "sent"]);

    let folder = store.open_map_folder("INBOX").unwrap();
    assert_eq!(folder.message_count().unwrap(), 3);
    assert_eq!(folder.get_message("1").unwrap(), expected_body("1"));
    assert!(matches!(folder.refresh(), Err(StoreError::ConnectionUnavailable)));
    assert!(matches!(store.subscribe_folder("inbox"), Err(StoreError::ConnectionUnavailable)));
    assert!(matches!(folder.get_message("2"), Err(StoreError::ConnectionUnavailable)));
    assert!(device.log().is_empty());
}

#[test]
fn open_folder_is_shared_and_checked() {
    let dir = TempDir::new().unwrap();
    let (_device, store) = online(&dir);
    let a = store.open_map_folder("Work/Projects").unwrap();
    let b = store.open_map_folder("Work/Projects").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.folder_id(), "/telecom/msg/Work/Projects");
    assert_eq!(a.description(), "sam@Pixel:Work/Projects");
    assert_eq!(
        a.message_id("7").as_str(),
        "map://00:11:22:33:44:55/Work/Projects/7"
    );
    assert!(matches!(store.open_folder("Nowhere"), Err(StoreError::NotFound(_))));
}

#[test]
fn refresh_policy_follows_settings() {
    let dir = TempDir::new().unwrap();
    let (_device, store) = online(&dir);
    let folders = store.list_folders().unwrap();
    let refreshable: Vec<&str> = folders
        .iter()
        .filter(|f| store.can_refresh_folder(f))
        .map(|f| f.full_name.as_str())
        .collect();
    assert_eq!(refreshable, vec!["inbox"]);
}

#[test]
fn observers_see_changes() {
    let dir = TempDir::new().unwrap();
    let (_device, store) = online(&dir);
    let folder = inbox(&store);
    let seen: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    folder
        .add_observer(Box::new(move |name, changes| {
            sink.lock().unwrap().push((name.to_string(), changes.added.len()));
        }))
        .unwrap();
    folder.refresh().unwrap();
    // Nothing new: no notification.
    folder.refresh().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![("inbox".to_string(), 3)]);
}

fn online_with(dir: &TempDir, settings: MapSettings) -> (Arc<FakeDevice>, MapStore) {
    let device = FakeDevice::new();
    let store = MapStore::new(settings, dir.path(), Arc::new(FakeConnector(device.clone()))).unwrap();
    store.connect().unwrap();
    store.list_folders().unwrap();
    device.clear_log();
    (device, store)
}

#[test]
fn junk_filter_follows_settings() {
    let dir = TempDir::new().unwrap();
    let (_device, store) = online_with(
        &dir,
        MapSettings {
            filter_junk: true,
            filter_junk_inbox: true,
            ..settings()
        },
    );
    assert!(inbox(&store).filter_junk());
    assert!(!store.open_map_folder("sent").unwrap().filter_junk());
    drop(store);

    let dir = TempDir::new().unwrap();
    let (_device, store) = online_with(
        &dir,
        MapSettings {
            filter_junk: true,
            ..settings()
        },
    );
    assert!(store.open_map_folder("sent").unwrap().filter_junk());

    let dir = TempDir::new().unwrap();
    let (_device, store) = online(&dir);
    assert!(!inbox(&store).filter_junk());
}

#[test]
fn stay_synchronized_prefetches_new_bodies() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online_with(
        &dir,
        MapSettings {
            stay_synchronized: true,
            ..settings()
        },
    );
    let folder = inbox(&store);
    folder.refresh().unwrap();
    assert_eq!(device.transfers.load(Ordering::SeqCst), 3);
    for uid in ["1", "2", "3"] {
        assert_eq!(folder.get_message_cached(uid).unwrap(), Some(expected_body(uid)));
    }

    device.set_listing("inbox", &[("1", false), ("2", true), ("3", false), ("4", false)]);
    folder.refresh().unwrap();
    assert_eq!(device.transfers.load(Ordering::SeqCst), 4);
    assert_eq!(folder.get_message_cached("4").unwrap(), Some(expected_body("4")));
}

#[test]
fn refresh_records_its_time() {
    let dir = TempDir::new().unwrap();
    let (device, store) = online(&dir);
    let folder = inbox(&store);
    assert_eq!(folder.last_refresh(), None);
    folder.refresh().unwrap();
    let stamp = folder.last_refresh().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok(), "{}", stamp);
    // Bodies are fetched on demand unless the store stays synchronized.
    assert_eq!(device.transfers.load(Ordering::SeqCst), 0);
    drop(folder);
    drop(store);

    let reopened = MapStore::new(settings(), dir.path(), Arc::new(FakeConnector(device))).unwrap();
    assert_eq!(
        reopened.summary().get_sync_state("/telecom/msg/inbox"),
        Some(stamp)
    );
}

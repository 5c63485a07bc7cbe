/*
 * lib.rs
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

//! C FFI for mapsync core. Stores and folders are identified by URI.
//! Create functions return a newly allocated URI string (free with mapsync_free_string).
//! All string parameters are UTF-8 NUL-terminated.
//!
//! The host supplies the Bluetooth side as a `MapsyncTransport` vtable (typically a thin layer
//! over obexd's D-Bus API) and reports transfer completion with `mapsync_transfer_notify`.

use libc::{c_char, c_int, c_void, size_t};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, RwLock};

use mapsync_core::config::{default_config_dir, default_storage_path, load_settings, MapSettings};
use mapsync_core::protocol::map::{
    FolderEntry, MapConnector, MapFolder, MapSession, MapStore, MessageListing, PropertyValue,
    TransferEvents, TransferId,
};
use mapsync_core::store::{ChangeSet, Folder, FolderInfo, Store, StoreError};
use mapsync_core::uri::{folder_uri, map_store_uri};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Settings file looked up when mapsync_store_new gets no settings path.
const SETTINGS_FILE: &str = "settings.xml";

/// Wrapper so *mut c_void can be moved into Send closures. C callbacks are invoked from worker threads.
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

// ---------- Transport vtable ----------

/// Property value kinds passed to OnRemoteProperty.
pub const MAPSYNC_PROPERTY_BOOL: c_int = 0;
pub const MAPSYNC_PROPERTY_U64: c_int = 1;
pub const MAPSYNC_PROPERTY_STRING: c_int = 2;

/// Listing callbacks handed to the transport. ctx must be passed back unchanged.
pub type OnRemoteFolder = extern "C" fn(*const c_char, *mut c_void);
/// Starts a message (object path); following properties belong to it.
pub type OnRemoteMessage = extern "C" fn(*const c_char, *mut c_void);
/// name, kind (MAPSYNC_PROPERTY_*), numeric value (bool/u64), string value, ctx.
pub type OnRemoteProperty = extern "C" fn(*const c_char, c_int, u64, *const c_char, *mut c_void);

/// The remote MAP client. Functions returning c_int return 0 on success. Strings returned by
/// the transport are allocated with malloc and freed by mapsync with free().
/// Every function receives the user_data given to mapsync_store_new.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MapsyncTransport {
    /// Open a MAP session to address/channel. Returns an opaque session handle, or NULL.
    pub connect: extern "C" fn(*const c_char, u16, *mut c_void) -> *mut c_void,
    /// Session object path (malloc'd).
    pub session_path: extern "C" fn(*mut c_void, *mut c_void) -> *mut c_char,
    pub set_folder: extern "C" fn(*mut c_void, *const c_char, *mut c_void) -> c_int,
    /// Call on_folder once per subfolder of the current folder.
    pub list_folders: extern "C" fn(*mut c_void, OnRemoteFolder, *mut c_void, *mut c_void) -> c_int,
    /// List messages of a folder relative to the current folder.
    pub list_messages:
        extern "C" fn(*mut c_void, *const c_char, OnRemoteMessage, OnRemoteProperty, *mut c_void, *mut c_void) -> c_int,
    /// Start writing message object_path to destination. Returns the transfer id (malloc'd), or NULL.
    pub get_message: extern "C" fn(*mut c_void, *const c_char, *const c_char, *mut c_void) -> *mut c_char,
    pub set_message_property: extern "C" fn(*mut c_void, *const c_char, *const c_char, c_int, *mut c_void) -> c_int,
    /// Current status of a transfer ("complete", "error", ...; malloc'd) or NULL. Optional.
    pub transfer_status: Option<extern "C" fn(*mut c_void, *const c_char, *mut c_void) -> *mut c_char>,
    /// Close the session. Optional.
    pub close: Option<extern "C" fn(*mut c_void, *mut c_void)>,
}

fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn ptr_to_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

/// Read and free a malloc'd string from the transport.
fn take_transport_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = ptr_to_str(ptr);
    unsafe { libc::free(ptr as *mut c_void) };
    s
}

fn check(op: &str, rc: c_int) -> Result<(), StoreError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(StoreError::Protocol(format!("{} failed ({})", op, rc)))
    }
}

extern "C" fn collect_folder(name: *const c_char, ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let entries = unsafe { &mut *(ctx as *mut Vec<FolderEntry>) };
    if let Some(name) = ptr_to_str(name) {
        entries.push(FolderEntry::new(name));
    }
}

extern "C" fn collect_message(object_path: *const c_char, ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let listings = unsafe { &mut *(ctx as *mut Vec<MessageListing>) };
    if let Some(path) = ptr_to_str(object_path) {
        listings.push(MessageListing::new(path));
    }
}

extern "C" fn collect_property(name: *const c_char, kind: c_int, number: u64, text: *const c_char, ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let listings = unsafe { &mut *(ctx as *mut Vec<MessageListing>) };
    let (Some(listing), Some(name)) = (listings.last_mut(), ptr_to_str(name)) else {
        return;
    };
    let value = match kind {
        MAPSYNC_PROPERTY_BOOL => PropertyValue::Bool(number != 0),
        MAPSYNC_PROPERTY_U64 => PropertyValue::U64(number),
        MAPSYNC_PROPERTY_STRING => match ptr_to_str(text) {
            Some(s) => PropertyValue::Str(s),
            None => return,
        },
        other => {
            debug!("ignoring property {} of kind {}", name, other);
            return;
        }
    };
    listing.properties.insert(name, value);
}

/// MapSession over the host's vtable. Handles are kept as integers so the session is Send + Sync.
struct FfiSession {
    transport: MapsyncTransport,
    session: usize,
    user_data: usize,
    path: String,
}

impl FfiSession {
    fn handle(&self) -> *mut c_void {
        self.session as *mut c_void
    }

    fn user_data(&self) -> *mut c_void {
        self.user_data as *mut c_void
    }
}

impl MapSession for FfiSession {
    fn session_path(&self) -> String {
        self.path.clone()
    }

    fn set_folder(&self, path: &str) -> Result<(), StoreError> {
        let path_c = to_c_string(path);
        check("SetFolder", (self.transport.set_folder)(self.handle(), path_c.as_ptr(), self.user_data()))
    }

    fn list_folders(&self) -> Result<Vec<FolderEntry>, StoreError> {
        let mut entries: Vec<FolderEntry> = Vec::new();
        let ctx = &mut entries as *mut Vec<FolderEntry> as *mut c_void;
        check(
            "ListFolders",
            (self.transport.list_folders)(self.handle(), collect_folder, ctx, self.user_data()),
        )?;
        Ok(entries)
    }

    fn list_messages(&self, folder: &str) -> Result<Vec<MessageListing>, StoreError> {
        let mut listings: Vec<MessageListing> = Vec::new();
        let ctx = &mut listings as *mut Vec<MessageListing> as *mut c_void;
        let folder_c = to_c_string(folder);
        check(
            "ListMessages",
            (self.transport.list_messages)(
                self.handle(),
                folder_c.as_ptr(),
                collect_message,
                collect_property,
                ctx,
                self.user_data(),
            ),
        )?;
        Ok(listings)
    }

    fn get_message(&self, object_path: &str, destination: &Path) -> Result<TransferId, StoreError> {
        let object_c = to_c_string(object_path);
        let dest_c = to_c_string(&destination.to_string_lossy());
        let id = (self.transport.get_message)(self.handle(), object_c.as_ptr(), dest_c.as_ptr(), self.user_data());
        take_transport_string(id).ok_or_else(|| StoreError::Protocol(format!("GetMessage {} failed", object_path)))
    }

    fn set_message_property(&self, object_path: &str, name: &str, value: bool) -> Result<(), StoreError> {
        let object_c = to_c_string(object_path);
        let name_c = to_c_string(name);
        check(
            "SetProperty",
            (self.transport.set_message_property)(
                self.handle(),
                object_c.as_ptr(),
                name_c.as_ptr(),
                if value { 1 } else { 0 },
                self.user_data(),
            ),
        )
    }

    fn transfer_status(&self, id: &str) -> Option<String> {
        let status_fn = self.transport.transfer_status?;
        let id_c = to_c_string(id);
        take_transport_string(status_fn(self.handle(), id_c.as_ptr(), self.user_data()))
    }

    fn close(&self) {
        if let Some(close_fn) = self.transport.close {
            close_fn(self.handle(), self.user_data());
        }
    }
}

struct FfiConnector {
    transport: MapsyncTransport,
    user_data: usize,
}

impl MapConnector for FfiConnector {
    fn connect(&self, settings: &MapSettings, _events: TransferEvents) -> Result<Arc<dyn MapSession>, StoreError> {
        let address_c = to_c_string(&settings.device_address);
        let user_data = self.user_data as *mut c_void;
        let session = (self.transport.connect)(address_c.as_ptr(), settings.channel, user_data);
        if session.is_null() {
            return Err(StoreError::Protocol(format!(
                "cannot open MAP session to {}",
                settings.device_label()
            )));
        }
        let path = take_transport_string((self.transport.session_path)(session, user_data)).unwrap_or_default();
        debug!("MAP session {} open", path);
        let session: Arc<dyn MapSession> = Arc::new(FfiSession {
            transport: self.transport,
            session: session as usize,
            user_data: self.user_data,
            path,
        });
        Ok(session)
    }
}

// ---------- Registry ----------

/// Registry of stores and folders keyed by URI. Hosts the runtime for asynchronous calls.
struct Registry {
    runtime: Option<tokio::runtime::Runtime>,
    stores: RwLock<HashMap<String, Arc<MapStore>>>,
    folders: RwLock<HashMap<String, Arc<MapFolder>>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: once_cell::sync::OnceCell<Registry> = once_cell::sync::OnceCell::new();
    REGISTRY.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build();
        if let Err(ref e) = runtime {
            warn!("cannot create runtime, asynchronous calls disabled: {}", e);
        }
        Registry {
            runtime: runtime.ok(),
            stores: RwLock::new(HashMap::new()),
            folders: RwLock::new(HashMap::new()),
        }
    })
}

fn lookup_store(uri: &str) -> Option<Arc<MapStore>> {
    registry().stores.read().ok().and_then(|g| g.get(uri).cloned())
}

fn lookup_folder(uri: &str) -> Option<Arc<MapFolder>> {
    registry().folders.read().ok().and_then(|g| g.get(uri).cloned())
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>> = std::cell::RefCell::new(None);
}

fn set_last_error(err: &StoreError) {
    let msg = to_c_string(&err.to_string());
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Resolve a store URI argument, setting the last error on failure.
fn store_arg(store_uri: *const c_char) -> Option<(String, Arc<MapStore>)> {
    let uri = match ptr_to_str(store_uri) {
        Some(s) => s,
        None => {
            set_last_error(&StoreError::new("store_uri is null or not valid UTF-8"));
            return None;
        }
    };
    match lookup_store(&uri) {
        Some(store) => Some((uri, store)),
        None => {
            set_last_error(&StoreError::new("store not found"));
            None
        }
    }
}

fn folder_arg(folder_uri: *const c_char) -> Option<Arc<MapFolder>> {
    let uri = match ptr_to_str(folder_uri) {
        Some(s) => s,
        None => {
            set_last_error(&StoreError::new("folder_uri is null or not valid UTF-8"));
            return None;
        }
    };
    let folder = lookup_folder(&uri);
    if folder.is_none() {
        set_last_error(&StoreError::new("folder not found"));
    }
    folder
}

fn status(result: Result<(), StoreError>) -> c_int {
    match result {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Version string (static, do not free).
#[no_mangle]
pub extern "C" fn mapsync_version() -> *const c_char {
    b"0.1.0\0".as_ptr() as *const c_char
}

/// Last error message from a failed call on this thread. Valid until next FFI call. Do not free.
#[no_mangle]
pub extern "C" fn mapsync_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Free a string returned by mapsync. No-op if ptr is NULL.
#[no_mangle]
pub unsafe extern "C" fn mapsync_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

/// Free message bytes returned by mapsync_folder_get_message. len must be the returned length.
#[no_mangle]
pub unsafe extern "C" fn mapsync_free_bytes(ptr: *mut u8, len: size_t) {
    if !ptr.is_null() {
        let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len));
    }
}

/// Install a stderr log subscriber. filter: tracing filter directives (e.g. "debug" or
/// "mapsync_core=trace"), NULL for "info". Returns 0, or -1 if invalid or already installed.
#[no_mangle]
pub unsafe extern "C" fn mapsync_init_logging(filter: *const c_char) -> c_int {
    let directives = ptr_to_str(filter).unwrap_or_else(|| "info".to_string());
    let env_filter = match EnvFilter::try_new(&directives) {
        Ok(f) => f,
        Err(e) => {
            set_last_error(&StoreError::new(e.to_string()));
            return -1;
        }
    };
    match tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&StoreError::new(e.to_string()));
            -1
        }
    }
}

// ---------- Store ----------

fn create_store(
    settings_path: Option<PathBuf>,
    storage_path: Option<PathBuf>,
    transport: MapsyncTransport,
    user_data: usize,
) -> Result<String, StoreError> {
    let settings_path = settings_path
        .or_else(|| default_config_dir().map(|d| d.join(SETTINGS_FILE)))
        .ok_or_else(|| StoreError::new("no settings path and no home directory"))?;
    let settings = load_settings(&settings_path).map_err(StoreError::new)?;
    if settings.device_address.is_empty() {
        return Err(StoreError::new(format!(
            "{} names no device address",
            settings_path.display()
        )));
    }
    let storage_path = storage_path
        .or_else(|| default_storage_path(&settings))
        .ok_or_else(|| StoreError::new("no storage path and no home directory"))?;
    let uri = map_store_uri(&settings.device_address, settings.channel);
    if lookup_store(&uri).is_some() {
        return Ok(uri);
    }
    let connector = Arc::new(FfiConnector { transport, user_data });
    let store = MapStore::new(settings, storage_path, connector)?;
    registry()
        .stores
        .write()
        .map_err(|e| StoreError::new(e.to_string()))?
        .insert(uri.clone(), Arc::new(store));
    Ok(uri)
}

/// Create a MAP store. settings_path: map-settings XML (NULL: ~/.mapsync/settings.xml).
/// storage_path: cache directory (NULL: derived from the device address). transport: vtable,
/// copied. Returns store URI (caller frees with mapsync_free_string), or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_new(
    settings_path: *const c_char,
    storage_path: *const c_char,
    transport: *const MapsyncTransport,
    user_data: *mut c_void,
) -> *mut c_char {
    if transport.is_null() {
        set_last_error(&StoreError::new("transport is null"));
        return ptr::null_mut();
    }
    let transport = *transport;
    match create_store(
        ptr_to_str(settings_path).map(PathBuf::from),
        ptr_to_str(storage_path).map(PathBuf::from),
        transport,
        user_data as usize,
    ) {
        Ok(uri) => {
            clear_last_error();
            to_c_string(&uri).into_raw()
        }
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Connect the store to its device. Blocks. Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_connect(store_uri: *const c_char) -> c_int {
    match store_arg(store_uri) {
        Some((_, store)) => status(store.connect()),
        None => -1,
    }
}

/// Save cached state and close the session. Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_disconnect(store_uri: *const c_char) -> c_int {
    match store_arg(store_uri) {
        Some((_, store)) => status(store.disconnect()),
        None => -1,
    }
}

/// Release a store and its open folders.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_free(store_uri: *const c_char) {
    let uri = match ptr_to_str(store_uri) {
        Some(s) => s,
        None => return,
    };
    let prefix = format!("{}/", uri);
    let _ = registry()
        .folders
        .write()
        .map(|mut g| g.retain(|k, _| !k.starts_with(&prefix)));
    let _ = registry().stores.write().map(|mut g| g.remove(&uri));
}

/// Display name of the store. brief != 0 for the short form. Caller frees with mapsync_free_string.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_name(store_uri: *const c_char, brief: c_int) -> *mut c_char {
    match store_arg(store_uri) {
        Some((_, store)) => {
            clear_last_error();
            to_c_string(&store.name(brief != 0)).into_raw()
        }
        None => ptr::null_mut(),
    }
}

/// Per-folder callback: full_name, display_name, folder type (0 normal, 1 inbox, 2 outbox,
/// 3 sent, 4 trash, 5 drafts), flag bits, unread, total, user_data.
type OnFolderInfo = extern "C" fn(*const c_char, *const c_char, c_int, u32, u32, u32, *mut c_void);

fn emit_folder(info: &FolderInfo, on_folder: OnFolderInfo, user_data: *mut c_void) {
    let full_name = to_c_string(&info.full_name);
    let display_name = to_c_string(&info.display_name);
    on_folder(
        full_name.as_ptr(),
        display_name.as_ptr(),
        info.flags.folder_type as c_int,
        info.flags.bits(),
        info.unread,
        info.total,
        user_data,
    );
}

/// List folders, parents before children, calling on_folder for each. Online this walks the
/// device; offline it reports the cached tree. Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_list_folders(
    store_uri: *const c_char,
    on_folder: OnFolderInfo,
    user_data: *mut c_void,
) -> c_int {
    let Some((_, store)) = store_arg(store_uri) else {
        return -1;
    };
    match store.list_folders() {
        Ok(folders) => {
            for info in &folders {
                emit_folder(info, on_folder, user_data);
            }
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Open a folder by full name. Returns folder URI (caller frees with mapsync_free_string), or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_open_folder(store_uri: *const c_char, name: *const c_char) -> *mut c_char {
    let Some((uri, store)) = store_arg(store_uri) else {
        return ptr::null_mut();
    };
    let name_str = match ptr_to_str(name) {
        Some(s) => s,
        None => {
            set_last_error(&StoreError::new("name is null or not valid UTF-8"));
            return ptr::null_mut();
        }
    };
    match store.open_map_folder(&name_str) {
        Ok(folder) => {
            let f_uri = folder_uri(&uri, folder.full_name());
            let _ = registry()
                .folders
                .write()
                .map(|mut g| g.insert(f_uri.clone(), folder));
            clear_last_error();
            to_c_string(&f_uri).into_raw()
        }
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Always fails: MAP cannot create folders. Returns -1 with a descriptive last error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_create_folder(store_uri: *const c_char, name: *const c_char) -> c_int {
    let Some((_, store)) = store_arg(store_uri) else {
        return -1;
    };
    status(store.create_folder(&ptr_to_str(name).unwrap_or_default()))
}

/// Always fails: MAP cannot delete folders.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_delete_folder(store_uri: *const c_char, name: *const c_char) -> c_int {
    let Some((_, store)) = store_arg(store_uri) else {
        return -1;
    };
    status(store.delete_folder(&ptr_to_str(name).unwrap_or_default()))
}

/// Always fails: MAP cannot rename folders.
#[no_mangle]
pub unsafe extern "C" fn mapsync_store_rename_folder(
    store_uri: *const c_char,
    old_name: *const c_char,
    new_name: *const c_char,
) -> c_int {
    let Some((_, store)) = store_arg(store_uri) else {
        return -1;
    };
    status(store.rename_folder(
        &ptr_to_str(old_name).unwrap_or_default(),
        &ptr_to_str(new_name).unwrap_or_default(),
    ))
}

/// Report a transfer status change from the transport ("complete", "error", or anything
/// else, which is ignored). Any thread. Returns 1 if it released a waiting fetch, 0 if no
/// fetch was waiting (e.g. it already timed out), -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_transfer_notify(
    store_uri: *const c_char,
    transfer_id: *const c_char,
    status: *const c_char,
) -> c_int {
    let Some((_, store)) = store_arg(store_uri) else {
        return -1;
    };
    let (Some(id), Some(status)) = (ptr_to_str(transfer_id), ptr_to_str(status)) else {
        set_last_error(&StoreError::new("transfer_id or status is null"));
        return -1;
    };
    clear_last_error();
    if store.transfer_events().notify(&id, &status) {
        1
    } else {
        0
    }
}

// ---------- Folder ----------

fn write_counts(changes: &ChangeSet, added: *mut u32, changed: *mut u32, removed: *mut u32) {
    let n = |v: &Vec<String>| u32::try_from(v.len()).unwrap_or(u32::MAX);
    unsafe {
        if !added.is_null() {
            *added = n(&changes.added);
        }
        if !changed.is_null() {
            *changed = n(&changes.changed);
        }
        if !removed.is_null() {
            *removed = n(&changes.removed);
        }
    }
}

/// Refresh the folder from the device. Blocks. Counts of added, changed and removed messages
/// are written to the non-NULL out parameters. Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_refresh(
    folder_uri: *const c_char,
    out_added: *mut u32,
    out_changed: *mut u32,
    out_removed: *mut u32,
) -> c_int {
    let Some(folder) = folder_arg(folder_uri) else {
        return -1;
    };
    match folder.refresh() {
        Ok(changes) => {
            write_counts(&changes, out_added, out_changed, out_removed);
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// status (0 ok, -1 error), added, changed, removed, error message (NULL on success), user_data.
type OnRefreshComplete = extern "C" fn(c_int, u32, u32, u32, *const c_char, *mut c_void);

/// Refresh on a worker thread; on_complete runs on that thread. Returns 0 if started.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_refresh_async(
    folder_uri: *const c_char,
    on_complete: OnRefreshComplete,
    user_data: *mut c_void,
) -> c_int {
    let Some(folder) = folder_arg(folder_uri) else {
        return -1;
    };
    let Some(runtime) = registry().runtime.as_ref() else {
        set_last_error(&StoreError::new("no runtime for asynchronous calls"));
        return -1;
    };
    let user_data = SendableUserData(user_data);
    runtime.spawn_blocking(move || {
        let ud = user_data;
        match folder.refresh() {
            Ok(changes) => {
                let (mut added, mut changed, mut removed) = (0u32, 0u32, 0u32);
                write_counts(&changes, &mut added, &mut changed, &mut removed);
                on_complete(0, added, changed, removed, ptr::null(), ud.0);
            }
            Err(e) => {
                let msg = to_c_string(&e.to_string());
                on_complete(-1, 0, 0, 0, msg.as_ptr(), ud.0);
            }
        }
    });
    clear_last_error();
    0
}

/// Raw message bytes, fetched from the device if not cached. Blocks. On success *out_len is
/// set and the caller frees the bytes with mapsync_free_bytes. Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_get_message(
    folder_uri: *const c_char,
    uid: *const c_char,
    out_len: *mut size_t,
) -> *mut u8 {
    if out_len.is_null() {
        set_last_error(&StoreError::new("null output pointer"));
        return ptr::null_mut();
    }
    let Some(folder) = folder_arg(folder_uri) else {
        return ptr::null_mut();
    };
    let Some(uid) = ptr_to_str(uid) else {
        set_last_error(&StoreError::new("uid is null or not valid UTF-8"));
        return ptr::null_mut();
    };
    match folder.get_message(&uid) {
        Ok(data) => {
            let boxed = data.into_boxed_slice();
            *out_len = boxed.len();
            clear_last_error();
            Box::into_raw(boxed) as *mut u8
        }
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

fn with_uid(
    folder_uri: *const c_char,
    uid: *const c_char,
    f: impl FnOnce(&MapFolder, &str) -> Result<(), StoreError>,
) -> c_int {
    let Some(folder) = folder_arg(folder_uri) else {
        return -1;
    };
    let Some(uid) = ptr_to_str(uid) else {
        set_last_error(&StoreError::new("uid is null or not valid UTF-8"));
        return -1;
    };
    status(f(&folder, &uid))
}

/// Mark a message read (read != 0) or unread on the device and locally.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_set_read(folder_uri: *const c_char, uid: *const c_char, read: c_int) -> c_int {
    with_uid(folder_uri, uid, |folder, uid| folder.set_read(uid, read != 0))
}

/// Mark a message deleted (deleted != 0) or undeleted on the device and locally.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_set_deleted(
    folder_uri: *const c_char,
    uid: *const c_char,
    deleted: c_int,
) -> c_int {
    with_uid(folder_uri, uid, |folder, uid| folder.set_deleted(uid, deleted != 0))
}

/// Message count in folder. Returns 0 on error (check mapsync_last_error).
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_message_count(folder_uri: *const c_char) -> u64 {
    let Some(folder) = folder_arg(folder_uri) else {
        return 0;
    };
    match folder.message_count() {
        Ok(n) => {
            clear_last_error();
            n
        }
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

/// Unread message count in folder. Returns 0 on error.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_unread_count(folder_uri: *const c_char) -> u64 {
    let Some(folder) = folder_arg(folder_uri) else {
        return 0;
    };
    match folder.unread_count() {
        Ok(n) => {
            clear_last_error();
            n
        }
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

/// Always fails: MAP folders cannot be appended to.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_append_message(
    folder_uri: *const c_char,
    data: *const u8,
    len: size_t,
) -> c_int {
    let Some(folder) = folder_arg(folder_uri) else {
        return -1;
    };
    let bytes: &[u8] = if data.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    status(folder.append_message(bytes))
}

/// Release a folder URI. The folder stays cached by its store.
#[no_mangle]
pub unsafe extern "C" fn mapsync_folder_free(folder_uri: *const c_char) {
    let uri = match ptr_to_str(folder_uri) {
        Some(s) => s,
        None => return,
    };
    let _ = registry().folders.write().map(|mut g| g.remove(&uri));
}

/*
 * config.rs
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

//! MAP account settings: load/save in ~/.mapsync/<name>.xml so the host UI's own configuration
//! is never overwritten. All XML read/write uses the quick_xml parser/writer; no hand parsing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::protocol::map::DEFAULT_TRANSFER_TIMEOUT;

const ROOT_ELEMENT: &str = "map-settings";

/// Settings for one paired device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSettings {
    pub device_name: String,
    /// Bluetooth address, e.g. "00:11:22:33:44:55".
    pub device_address: String,
    /// RFCOMM channel of the MAS instance.
    pub channel: u16,
    pub service_name: String,
    pub user: String,
    pub email: String,
    /// Refresh every folder, not only the inbox.
    pub check_all: bool,
    /// Mark the inbox for filtering of new messages.
    pub filter_inbox: bool,
    /// Mark folders for junk filtering of new messages.
    pub filter_junk: bool,
    /// With `filter_junk`, mark only the inbox.
    pub filter_junk_inbox: bool,
    /// Fetch the bodies of new messages during refresh so they are readable offline.
    pub stay_synchronized: bool,
    /// Seconds to wait for a message transfer to complete.
    pub transfer_timeout_secs: u64,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            device_address: String::new(),
            channel: 0,
            service_name: String::new(),
            user: String::new(),
            email: String::new(),
            check_all: false,
            filter_inbox: false,
            filter_junk: false,
            filter_junk_inbox: false,
            stay_synchronized: false,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT.as_secs(),
        }
    }
}

impl MapSettings {
    pub fn transfer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Name shown for the device: its friendly name, else its address.
    pub fn device_label(&self) -> &str {
        if self.device_name.is_empty() {
            &self.device_address
        } else {
            &self.device_name
        }
    }
}

/// Default config directory: ~/.mapsync.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".mapsync"))
}

/// Default storage directory for a device: ~/.mapsync/cache/<address with ':' as '_'>.
pub fn default_storage_path(settings: &MapSettings) -> Option<PathBuf> {
    let dir = settings.device_address.replace(':', "_");
    default_config_dir().map(|d| d.join("cache").join(dir))
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<MapSettings, String> {
    if !path.exists() {
        return Ok(MapSettings::default());
    }
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    parse_settings_xml(&content)
}

/// Write settings to `path` (temp file then rename), creating the parent directory.
pub fn save_settings(path: &Path, settings: &MapSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let bytes = settings_xml_to_bytes(settings)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| e.to_string())?;
    fs::rename(&tmp, path).map_err(|e| e.to_string())
}

/// Parse `<map-settings><device-name>...</device-name>...</map-settings>`. Unknown elements are ignored.
pub fn parse_settings_xml(content: &str) -> Result<MapSettings, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut values: HashMap<String, String> = HashMap::new();
    let mut in_root = false;
    let mut element_name = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(format!("XML parse error: {}", e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == ROOT_ELEMENT {
                    in_root = true;
                } else if in_root {
                    element_name = name;
                }
            }
            Ok(Event::Text(e)) => {
                if !in_root || element_name.is_empty() {
                    continue;
                }
                let text = e.unescape().map_err(|e| e.to_string())?.trim().to_string();
                values.insert(std::mem::take(&mut element_name), text);
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == ROOT_ELEMENT.as_bytes() {
                    in_root = false;
                }
                element_name.clear();
            }
            _ => {}
        }
        buf.clear();
    }

    let mut s = MapSettings::default();
    let text = |key: &str| values.get(key).cloned().unwrap_or_default();
    let flag = |key: &str, default: bool| match values.get(key).map(String::as_str) {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    };
    s.device_name = text("device-name");
    s.device_address = text("device-address");
    s.service_name = text("service-name");
    s.user = text("user");
    s.email = text("email");
    if let Some(v) = values.get("channel") {
        s.channel = v.parse().map_err(|_| format!("invalid channel: {}", v))?;
    }
    if let Some(v) = values.get("transfer-timeout") {
        s.transfer_timeout_secs = v.parse().map_err(|_| format!("invalid transfer-timeout: {}", v))?;
    }
    s.check_all = flag("check-all", s.check_all);
    s.filter_inbox = flag("filter-inbox", s.filter_inbox);
    s.filter_junk = flag("filter-junk", s.filter_junk);
    s.filter_junk_inbox = flag("filter-junk-inbox", s.filter_junk_inbox);
    s.stay_synchronized = flag("stay-synchronized", s.stay_synchronized);
    Ok(s)
}

fn write_element(writer: &mut Writer<&mut Vec<u8>>, name: &str, value: &str) -> Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Build settings XML into a byte vector (UTF-8).
pub fn settings_xml_to_bytes(s: &MapSettings) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut writer = Writer::new(&mut out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))
        .map_err(|e| e.to_string())?;
    write_element(&mut writer, "device-name", &s.device_name)?;
    write_element(&mut writer, "device-address", &s.device_address)?;
    write_element(&mut writer, "channel", &s.channel.to_string())?;
    write_element(&mut writer, "service-name", &s.service_name)?;
    write_element(&mut writer, "user", &s.user)?;
    write_element(&mut writer, "email", &s.email)?;
    write_element(&mut writer, "check-all", &s.check_all.to_string())?;
    write_element(&mut writer, "filter-inbox", &s.filter_inbox.to_string())?;
    write_element(&mut writer, "filter-junk", &s.filter_junk.to_string())?;
    write_element(&mut writer, "filter-junk-inbox", &s.filter_junk_inbox.to_string())?;
    write_element(&mut writer, "stay-synchronized", &s.stay_synchronized.to_string())?;
    write_element(&mut writer, "transfer-timeout", &s.transfer_timeout_secs.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
        .map_err(|e| e.to_string())?;
    Ok(out)
}

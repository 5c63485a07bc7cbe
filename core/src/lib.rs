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

//! Core of mapsync: reads and manages messages stored on a paired phone over a
//! Message Access Profile session.
//!
//! `protocol::map` turns the single stateful MAP session into blocking, thread-safe
//! Store and Folder operations. `localstorage` keeps the folder tree, per-folder
//! summaries and fetched bodies on disk between runs.

pub mod config;
pub mod localstorage;
pub mod message_id;
pub mod protocol;
pub mod store;
pub mod uri;

/*
 * hierarchy.rs
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

//! Folder hierarchy discovery: walks the device's folder tree through the session coordinator
//! and builds an arena of folder nodes in discovery order (parents before children).

use tracing::{debug, warn};

use crate::protocol::map::session::SessionCoordinator;
use crate::store::{FolderFlags, FolderType, StoreError};

/// Child names the device lists that are not message folders.
const RESERVED_NAMES: [&str; 2] = ["msg", "MSG"];

/// Index of a node in its `FolderTree`.
pub type NodeId = usize;

/// One discovered folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// Absolute remote path, e.g. "/telecom/msg/inbox/work". Used as the folder id.
    pub id: String,
    /// Remote name of this folder (last path segment).
    pub name: String,
    /// Path below the root, e.g. "inbox/work".
    pub full_name: String,
    /// Name shown to the user ("Inbox" for the inbox, otherwise `name`).
    pub display_name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub flags: FolderFlags,
}

/// Arena of folder nodes. Node ids are stable for the life of the tree.
#[derive(Debug, Clone, Default)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
}

impl FolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node under `parent` (None: top level).
    pub fn add(&mut self, parent: Option<NodeId>, id: String, name: String, flags: FolderFlags) -> NodeId {
        let full_name = match parent.and_then(|p| self.nodes.get(p)) {
            Some(p) => format!("{}/{}", p.full_name, name),
            None => name.clone(),
        };
        let display_name = if flags.folder_type == FolderType::Inbox {
            "Inbox".to_string()
        } else {
            name.clone()
        };
        let node_id = self.nodes.len();
        self.nodes.push(FolderNode {
            id,
            name,
            full_name,
            display_name,
            parent,
            children: Vec::new(),
            flags,
        });
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            p.children.push(node_id);
        }
        node_id
    }

    pub fn get(&self, node: NodeId) -> Option<&FolderNode> {
        self.nodes.get(node)
    }

    /// All nodes, parents before children.
    pub fn nodes(&self) -> &[FolderNode] {
        &self.nodes
    }

    pub fn roots(&self) -> impl Iterator<Item = &FolderNode> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }

    pub fn find_by_id(&self, id: &str) -> Option<&FolderNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_by_full_name(&self, full_name: &str) -> Option<&FolderNode> {
        self.nodes.iter().find(|n| n.full_name == full_name)
    }

    pub fn parent_of(&self, node: &FolderNode) -> Option<&FolderNode> {
        node.parent.and_then(|p| self.nodes.get(p))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Result of a discovery pass. `errors` holds the subtrees that could not be listed; their
/// folders are missing from `tree`, so callers must not treat absence as deletion.
#[derive(Debug, Default)]
pub struct Discovery {
    pub tree: FolderTree,
    pub errors: Vec<(String, StoreError)>,
}

impl Discovery {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walk the hierarchy below `root`. Fails only if `root` itself cannot be listed.
pub fn discover(coordinator: &SessionCoordinator, root: &str) -> Result<Discovery, StoreError> {
    let mut discovery = Discovery::default();
    walk(coordinator, root, None, &mut discovery)?;
    debug!(
        "discovered {} folders below {} ({} subtree errors)",
        discovery.tree.len(),
        root,
        discovery.errors.len()
    );
    Ok(discovery)
}

fn walk(
    coordinator: &SessionCoordinator,
    path: &str,
    parent: Option<NodeId>,
    discovery: &mut Discovery,
) -> Result<(), StoreError> {
    coordinator.with_folder_locked(path, |scope| {
        let entries = scope.list_folders()?;
        for entry in entries {
            let name = entry.name;
            if name.is_empty() || RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            let child_path = format!("{}/{}", path, name);
            let top_level = parent.is_none();
            let flags = FolderFlags::of_type(FolderType::from_name(&name, top_level));
            let node = discovery.tree.add(parent, child_path.clone(), name, flags);
            if let Err(e) = walk(scope.coordinator(), &child_path, Some(node), discovery) {
                warn!("cannot list folders in {}: {}", child_path, e);
                discovery.errors.push((child_path, e));
            }
        }
        Ok(())
    })
}

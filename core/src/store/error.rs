/*
 * error.rs
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

//! Store and protocol errors.

use thiserror::Error;

/// Errors from Store, Folder, or MAP session operations.
///
/// `Clone` so that one fetch outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No MAP session is attached (store offline or disconnected).
    #[error("not connected to the device")]
    ConnectionUnavailable,
    /// The device refused to change the current folder. The cursor keeps its last good value.
    #[error("cannot select folder '{path}': {source}")]
    FolderSelectFailed {
        path: String,
        #[source]
        source: Box<StoreError>,
    },
    /// The device or transport reported a failure.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A transfer did not complete before its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The operation has no MAP equivalent.
    #[error("Cannot {action} '{target}'. MAP doesn't support it")]
    NotSupported { action: String, target: String },
    /// Folder or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Generic error message (local storage, poisoned locks).
    #[error("{0}")]
    Message(String),
}

impl StoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    pub fn not_supported(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self::NotSupported {
            action: action.into(),
            target: target.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Message(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        StoreError::Message(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_names_action_and_target() {
        let e = StoreError::not_supported("create folder", "Work");
        assert_eq!(e.to_string(), "Cannot create folder 'Work'. MAP doesn't support it");
    }

    #[test]
    fn select_failure_keeps_cause() {
        let e = StoreError::FolderSelectFailed {
            path: "/telecom/msg/inbox".to_string(),
            source: Box::new(StoreError::NotFound("inbox".to_string())),
        };
        let s = e.to_string();
        assert!(s.contains("/telecom/msg/inbox"));
        assert!(s.contains("not found: inbox"));
    }
}

//! Session workspace management.
//!
//! A session is a durable, caller-named workspace directory that persists
//! guest-visible files across separate execution requests. Requests without a
//! session id get a request-scoped scratch directory instead, deleted when the
//! request completes.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── sessions/
//! │   └── {session-id}/   # persistent workspace, one per caller-named id
//! └── scratch/
//!     └── scratch-XXXX/   # request-scoped, removed on handle drop
//! ```
//!
//! The execution path never deletes a session directory; retention is an
//! out-of-scope operational concern.
//!
//! # Concurrency
//!
//! Two concurrent requests naming the same session id would race on the shared
//! directory. The store therefore hands out a per-id async mutex; the
//! orchestrator holds it for the duration of an execution. Different ids never
//! contend, and the store itself is safe to call concurrently for any ids.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tracing::{debug, instrument, trace};

use crate::error::SessionError;

/// Directory permissions: owner read/write/execute only (0700).
const DIR_PERMISSIONS: u32 = 0o700;

/// Maximum accepted session id length.
const MAX_SESSION_ID_LEN: usize = 64;

/// A resolved workspace, either session-persistent or request-scoped.
#[derive(Debug)]
pub enum WorkspaceHandle {
    /// Durable workspace for a named session.
    Session {
        /// The caller-supplied session id.
        id: String,
        /// The workspace directory.
        path: PathBuf,
    },
    /// Scratch workspace deleted when this handle drops.
    Scratch(TempDir),
}

impl WorkspaceHandle {
    /// The host path mounted into the sandbox.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Session { path, .. } => path,
            Self::Scratch(dir) => dir.path(),
        }
    }

    /// The session id, if this workspace is session-backed.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session { id, .. } => Some(id),
            Self::Scratch(_) => None,
        }
    }
}

/// Maps session ids to durable workspace directories.
#[derive(Debug)]
pub struct SessionStore {
    sessions_root: PathBuf,
    scratch_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    /// Creates a store rooted at the given directories, creating them if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Io` if a root directory cannot be created.
    pub fn new(
        sessions_root: impl Into<PathBuf>,
        scratch_root: impl Into<PathBuf>,
    ) -> Result<Self, SessionError> {
        let sessions_root = sessions_root.into();
        let scratch_root = scratch_root.into();

        for dir in [&sessions_root, &scratch_root] {
            create_private_dir(dir)?;
        }

        Ok(Self {
            sessions_root,
            scratch_root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves a workspace for the given session id.
    ///
    /// With an id, returns that session's directory, creating it (empty) on
    /// first reference; subsequent calls with the same id return the same
    /// directory with whatever state earlier executions left in it. Without
    /// an id, returns a fresh scratch directory removed when the handle drops.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidId` for ids that fail validation and
    /// `SessionError::Io` if directory creation fails. In either case the
    /// request must not proceed to sandbox launch.
    #[instrument(skip(self))]
    pub fn resolve(&self, session_id: Option<&str>) -> Result<WorkspaceHandle, SessionError> {
        match session_id {
            Some(id) => {
                validate_session_id(id)?;
                let path = self.sessions_root.join(id);
                let created = !path.exists();
                create_private_dir(&path)?;
                if created {
                    debug!(%id, path = %path.display(), "Created session workspace");
                } else {
                    trace!(%id, "Reusing session workspace");
                }
                Ok(WorkspaceHandle::Session {
                    id: id.to_string(),
                    path,
                })
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("scratch-")
                    .tempdir_in(&self.scratch_root)
                    .map_err(|e| SessionError::Io {
                        context: format!(
                            "failed to create scratch workspace in {}",
                            self.scratch_root.display()
                        ),
                        source: e,
                    })?;
                trace!(path = %dir.path().display(), "Created scratch workspace");
                Ok(WorkspaceHandle::Scratch(dir))
            }
        }
    }

    /// Returns the serialization lock for a session id.
    ///
    /// The same id always yields the same lock while any caller still holds
    /// it; the caller keeps the guard across the whole execution to serialize
    /// same-session requests. Entries nobody holds or waits on are evicted
    /// here, so the map tracks in-flight sessions rather than every id ever
    /// seen.
    #[must_use]
    pub fn session_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A strong count of 1 means only the map refers to the lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Root directory holding session workspaces.
    #[must_use]
    pub fn sessions_root(&self) -> &Path {
        &self.sessions_root
    }
}

/// Validates a caller-supplied session id before any filesystem access.
///
/// Ids are path components on shared storage, so the character set is kept
/// strict: 1-64 chars from `[A-Za-z0-9._-]`, and never `.` or `..`.
///
/// # Errors
///
/// Returns `SessionError::InvalidId` with the failing rule.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let reject = |reason: &str| {
        Err(SessionError::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };

    if id.is_empty() {
        return reject("empty");
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return reject("longer than 64 characters");
    }
    if id == "." || id == ".." {
        return reject("path traversal");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return reject("contains characters outside [A-Za-z0-9._-]");
    }

    Ok(())
}

/// Creates a directory (and parents) with 0700 permissions.
fn create_private_dir(dir: &Path) -> Result<(), SessionError> {
    fs::create_dir_all(dir).map_err(|e| SessionError::Io {
        context: format!("failed to create directory {}", dir.display()),
        source: e,
    })?;

    let permissions = fs::Permissions::from_mode(DIR_PERMISSIONS);
    fs::set_permissions(dir, permissions).map_err(|e| SessionError::Io {
        context: format!("failed to set permissions on {}", dir.display()),
        source: e,
    })?;

    Ok(())
}

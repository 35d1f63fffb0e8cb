// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Empirical write-protection verification.
//!
//! The probes never trust what the protection commands reported; they
//! observe the filesystem directly. A read listing gates everything else: a
//! volume that cannot be listed is unreadable and the write probes are
//! skipped. Write denial is recognized by error kind, EACCES from the
//! permission layer and EROFS once the block device or mount is read-only.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};
use tempfile::Builder;

// =============================================================================
// Constants
// =============================================================================

/// Name prefix for probe files and directories, kept hidden on the volume.
const PROBE_PREFIX: &str = ".usb-shield-probe-";

/// Payload written by the file probe.
const PROBE_PAYLOAD: &[u8] = b"usb-shield write probe\n";

// =============================================================================
// Types
// =============================================================================

/// Outcome of the three verification probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Top-level listing succeeded.
    pub read_accessible: bool,
    /// Creating and writing a file was denied.
    pub file_blocked: bool,
    /// Creating a directory was denied.
    pub dir_blocked: bool,
    /// Entries visible to the read probe.
    pub entries_seen: Option<usize>,
}

impl ProbeReport {
    /// True only when both write probes were denied.
    #[must_use]
    pub const fn write_protected(&self) -> bool {
        self.file_blocked && self.dir_blocked
    }

    const fn unreadable() -> Self {
        Self {
            read_accessible: false,
            file_blocked: false,
            dir_blocked: false,
            entries_seen: None,
        }
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Run the read, file-create and directory-create probes against a volume
/// root. Any read error short-circuits to an unreadable report with both
/// write probes unconfirmed.
#[must_use]
pub fn verify(root: &Path) -> ProbeReport {
    let entries = match list_entries(root) {
        Ok(count) => count,
        Err(e) => {
            warn!("read probe failed for {}: {e}", root.display());
            return ProbeReport::unreadable();
        }
    };
    debug!("read probe: {entries} entries under {}", root.display());

    let file_blocked = file_probe(root);
    let dir_blocked = dir_probe(root);

    ProbeReport {
        read_accessible: true,
        file_blocked,
        dir_blocked,
        entries_seen: Some(entries),
    }
}

/// Count top-level entries; any error means the volume is unreadable.
fn list_entries(root: &Path) -> io::Result<usize> {
    Ok(fs::read_dir(root)?.count())
}

/// Try to create and fill a uniquely named file at the volume root.
/// Returns true when the volume denied the write.
fn file_probe(root: &Path) -> bool {
    let created = Builder::new()
        .prefix(PROBE_PREFIX)
        .suffix(".tmp")
        .tempfile_in(root);

    let mut file = match created {
        Ok(file) => file,
        Err(e) if is_write_denied(&e) => {
            debug!("file probe denied at creation: {e}");
            return true;
        }
        Err(e) => {
            warn!(
                "file probe error on {}, treating as unprotected: {e}",
                root.display()
            );
            return false;
        }
    };

    let denied = match file.as_file_mut().write_all(PROBE_PAYLOAD) {
        Ok(()) => false,
        Err(e) if is_write_denied(&e) => {
            debug!("file probe denied at write: {e}");
            true
        }
        Err(e) => {
            warn!(
                "file probe write error on {}, treating as unprotected: {e}",
                root.display()
            );
            false
        }
    };

    // The volume accepted the create, so a probe file exists either way.
    if let Err(e) = file.close() {
        warn!("probe file cleanup failed: {e}");
    }

    denied
}

/// Try to create a uniquely named directory at the volume root.
/// Returns true when the volume denied the creation.
fn dir_probe(root: &Path) -> bool {
    let created = Builder::new().prefix(PROBE_PREFIX).tempdir_in(root);

    let dir = match created {
        Ok(dir) => dir,
        Err(e) if is_write_denied(&e) => {
            debug!("directory probe denied: {e}");
            return true;
        }
        Err(e) => {
            warn!(
                "directory probe error on {}, treating as unprotected: {e}",
                root.display()
            );
            return false;
        }
    };

    if let Err(e) = dir.close() {
        warn!("probe directory cleanup failed: {e}");
    }

    false
}

/// Denial kinds produced by the protection mechanisms: EACCES from the
/// permission layer, EROFS once the device or mount is read-only.
fn is_write_denied(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
    )
}

// =============================================================================
// Tests
// =============================================================================

// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Mounted-volume enumeration and removable-media classification.
//!
//! Volumes come from the kernel mount table (`/proc/self/mounts`) and are
//! enriched with the sysfs removable flag of the backing disk. The
//! classifier is a heuristic: the sysfs flag when the kernel exposes one,
//! otherwise the shape of the mount point. False positives and negatives
//! are possible in both directions; callers treat the result as best-effort
//! defense, not a security boundary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Kernel mount table read by the system enumerator.
const MOUNT_TABLE_PATH: &str = "/proc/self/mounts";

/// Sysfs root holding per-disk attributes.
const SYSFS_BLOCK_PATH: &str = "/sys/block";

// =============================================================================
// Types
// =============================================================================

/// One mounted volume as reported by the enumeration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Mount point; identifies the volume for the lifetime of the mount.
    pub mount_point: PathBuf,
    /// Backing device node (e.g. `/dev/sdb1`).
    pub device: String,
    /// Filesystem type as reported by the kernel.
    pub fs_type: String,
    /// Mount options, split on commas.
    pub options: Vec<String>,
    /// Sysfs removable flag of the backing disk; `None` when the disk has
    /// no sysfs entry (device mapper, network-backed mounts).
    pub removable: Option<bool>,
}

/// Source of mounted-volume listings.
pub trait VolumeSource: Send + Sync {
    /// List currently mounted volumes.
    ///
    /// # Errors
    /// Fails when the underlying mount table cannot be read; callers skip
    /// the current poll tick and retry on the next one.
    fn list_volumes(&self) -> Result<Vec<VolumeInfo>>;
}

/// System enumerator backed by the kernel mount table and sysfs.
pub struct MountTable {
    mount_table: PathBuf,
    sysfs_block: PathBuf,
}

impl MountTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mount_table: PathBuf::from(MOUNT_TABLE_PATH),
            sysfs_block: PathBuf::from(SYSFS_BLOCK_PATH),
        }
    }

    /// Enumerator reading from alternate locations.
    #[must_use]
    pub const fn with_paths(mount_table: PathBuf, sysfs_block: PathBuf) -> Self {
        Self {
            mount_table,
            sysfs_block,
        }
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeSource for MountTable {
    fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        let raw = fs::read(&self.mount_table).with_context(|| {
            format!("Failed to read mount table {}", self.mount_table.display())
        })?;
        // The kernel octal-escapes whitespace only; a volume label can carry
        // raw non-UTF-8 bytes. Lossy decoding garbles that entry's name
        // instead of failing the whole listing.
        let table = String::from_utf8_lossy(&raw);

        Ok(parse_mount_table(&table)
            .into_iter()
            .map(|mut volume| {
                volume.removable = removable_flag(&self.sysfs_block, &volume.device);
                volume
            })
            .collect())
    }
}

// =============================================================================
// Mount Table Parsing
// =============================================================================

/// Parse a full mount table, keeping block-device mounts only.
fn parse_mount_table(table: &str) -> Vec<VolumeInfo> {
    table.lines().filter_map(parse_mount_line).collect()
}

/// Parse one mount table line: `device mountpoint fstype options dump pass`.
///
/// Pseudo filesystems (proc, tmpfs, cgroup, ...) are dropped by keeping
/// only `/dev/`-backed entries, mirroring a physical-partitions query.
fn parse_mount_line(line: &str) -> Option<VolumeInfo> {
    let mut fields = line.split_ascii_whitespace();
    let device = fields.next()?;
    let mount_point = fields.next()?;
    let fs_type = fields.next()?;
    let options = fields.next()?;

    if !device.starts_with("/dev/") {
        return None;
    }

    Some(VolumeInfo {
        mount_point: PathBuf::from(unescape_mount_field(mount_point)),
        device: unescape_mount_field(device),
        fs_type: fs_type.to_string(),
        options: options.split(',').map(str::to_string).collect(),
        removable: None,
    })
}

/// Decode the octal escapes the kernel uses for whitespace in mount fields
/// (`\040` space, `\011` tab, `\012` newline, `\134` backslash).
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escape: String = chars.by_ref().take(3).collect();
        match u8::from_str_radix(&escape, 8) {
            Ok(byte) => out.push(char::from(byte)),
            Err(_) => {
                out.push('\\');
                out.push_str(&escape);
            }
        }
    }

    out
}

// =============================================================================
// Sysfs Removable Flag
// =============================================================================

/// Read the sysfs removable flag for the disk backing `device`.
fn removable_flag(sysfs_block: &Path, device: &str) -> Option<bool> {
    let name = device.strip_prefix("/dev/")?;
    if name.is_empty() || name.contains('/') {
        return None;
    }

    for candidate in disk_candidates(name) {
        let attr = sysfs_block.join(&candidate).join("removable");
        if let Ok(raw) = fs::read_to_string(&attr) {
            return Some(raw.trim() == "1");
        }
    }

    None
}

/// Candidate whole-disk names for a device name, most specific first.
///
/// `/sys/block` lists whole disks only, so a partition name has to be
/// reduced: `sdb1` -> `sdb`, `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` ->
/// `mmcblk0`. Names that already are whole disks (`sdb`, `sr0`, `loop0`)
/// match on the first candidate.
fn disk_candidates(name: &str) -> Vec<String> {
    let mut candidates = vec![name.to_string()];

    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed != name && !trimmed.is_empty() {
        // nvme0n1p2 / mmcblk0p1 keep their disk digits; the trailing 'p'
        // separates the disk name from the partition number.
        if let Some(disk) = trimmed.strip_suffix('p') {
            if disk.ends_with(|c: char| c.is_ascii_digit()) {
                candidates.push(disk.to_string());
            }
        }
        candidates.push(trimmed.to_string());
    }

    candidates
}

// =============================================================================
// Removability Classifier
// =============================================================================

/// Policy for the removable-media classification heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Mount point of the primary system volume, never classified removable.
    pub system_volume: PathBuf,

    /// Mount-point prefixes under which removable media canonically appear.
    pub media_roots: Vec<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            system_volume: PathBuf::from("/"),
            media_roots: vec![PathBuf::from("/media"), PathBuf::from("/run/media")],
        }
    }
}

/// Heuristic removable-media test.
///
/// A volume counts as removable when the kernel flags its backing disk as
/// removable, or when it is not the system volume and sits under one of the
/// canonical media roots. USB enclosures that report fixed media are caught
/// by the mount-point fallback; fixed disks deliberately mounted under a
/// media root are misclassified as removable. Both directions are tolerated.
#[must_use]
pub fn is_removable(volume: &VolumeInfo, policy: &ClassifierConfig) -> bool {
    if volume.removable == Some(true) {
        return true;
    }

    volume.mount_point != policy.system_volume
        && policy
            .media_roots
            .iter()
            .any(|root| volume.mount_point.starts_with(root))
}

// =============================================================================
// Tests
// =============================================================================

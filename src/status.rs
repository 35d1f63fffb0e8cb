// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Protection-state classification and status reporting.
//!
//! The guard pushes copies of its per-device records into a thread-safe
//! status board and appends human-readable lines to an activity log; both
//! paths are fire-and-forget and never stop the guard. Classification
//! itself is a pure function of the two verification booleans.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use log::warn;
use serde::Serialize;

// =============================================================================
// Constants
// =============================================================================

/// Bounded number of recent activity entries kept on the board.
const ACTIVITY_CAPACITY: usize = 200;

/// Timestamp format for activity log lines.
const ACTIVITY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Classification
// =============================================================================

/// Classification derived from the verification booleans. Recomputed on
/// demand, never stored independently of the booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionOutcome {
    /// Read works, writes blocked.
    FullyProtected,
    /// Writes blocked but read access lost. [`classify`] never returns
    /// this (a failed read skips the write probes); kept so externally
    /// stored states can express it.
    PartialReadOnlyFailed,
    /// Read works and writes still land; protection did not take hold.
    PartialWriteAllowed,
    /// The volume cannot even be read.
    AccessFailed,
}

/// Map the two verification booleans to an outcome. Read failure
/// dominates, then write protection decides.
#[must_use]
pub const fn classify(read_accessible: bool, write_protected: bool) -> ProtectionOutcome {
    match (read_accessible, write_protected) {
        (true, true) => ProtectionOutcome::FullyProtected,
        (true, false) => ProtectionOutcome::PartialWriteAllowed,
        (false, _) => ProtectionOutcome::AccessFailed,
    }
}

impl ProtectionOutcome {
    /// Human-readable status fragment.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::FullyProtected => "fully protected (read allowed, writes blocked)",
            Self::PartialReadOnlyFailed => "writes blocked but read access lost",
            Self::PartialWriteAllowed => "write protection FAILED (volume still writable)",
            Self::AccessFailed => "access failed (volume unreadable)",
        }
    }

    /// True for the one fully protected state.
    #[must_use]
    pub const fn is_protected(self) -> bool {
        matches!(self, Self::FullyProtected)
    }
}

impl std::fmt::Display for ProtectionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

// =============================================================================
// Tracked Devices
// =============================================================================

/// In-memory record of a connected, protection-attempted volume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedDevice {
    /// Mount point; stable identity for the lifetime of the connection.
    pub mount_point: PathBuf,
    /// Backing device node, for display.
    pub device: String,
    /// When the arrival was observed.
    pub connected_at: DateTime<Local>,
    /// Read probe result.
    pub read_accessible: bool,
    /// Combined write-probe result.
    pub write_protected: bool,
    /// The mechanism sequence ran to completion. Not a success claim.
    pub protection_applied: bool,
}

impl TrackedDevice {
    /// Current classification, derived from the stored booleans.
    #[must_use]
    pub const fn outcome(&self) -> ProtectionOutcome {
        classify(self.read_accessible, self.write_protected)
    }

    /// One-line state for logs and removal notices.
    #[must_use]
    pub fn status_line(&self) -> String {
        format!("{}: {}", self.mount_point.display(), self.outcome())
    }
}

// =============================================================================
// Status Sink
// =============================================================================

/// Receiver of guard state updates. Implementations are called from the
/// guard's task and must not block it for long; every call is
/// fire-and-forget with no acknowledgment.
pub trait StatusSink: Send + Sync {
    /// A device finished the pipeline and has a fresh record.
    fn report_device(&self, device: &TrackedDevice);

    /// A tracked device disappeared; `device` holds its last known state.
    fn report_removal(&self, device: &TrackedDevice);

    /// Free-form activity line.
    fn report_activity(&self, message: &str);
}

// =============================================================================
// Status Board
// =============================================================================

/// Timestamped activity entry kept on the board.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

/// Owned copy of the board contents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub devices: Vec<TrackedDevice>,
    pub activity: Vec<ActivityEntry>,
    pub updated_at: Option<DateTime<Local>>,
}

/// Thread-safe store of the guard's last reported state, for
/// dashboard-style readers. Holds copies only; the guard keeps the live
/// records and talks to the board solely through [`StatusSink`].
#[derive(Default)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
}

#[derive(Default)]
struct BoardState {
    devices: BTreeMap<PathBuf, TrackedDevice>,
    activity: VecDeque<ActivityEntry>,
    updated_at: Option<DateTime<Local>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current board contents.
    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.lock_state();
        BoardSnapshot {
            devices: state.devices.values().cloned().collect(),
            activity: state.activity.iter().cloned().collect(),
            updated_at: state.updated_at,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusSink for StatusBoard {
    fn report_device(&self, device: &TrackedDevice) {
        let mut state = self.lock_state();
        state
            .devices
            .insert(device.mount_point.clone(), device.clone());
        state.updated_at = Some(Local::now());
    }

    fn report_removal(&self, device: &TrackedDevice) {
        let mut state = self.lock_state();
        state.devices.remove(&device.mount_point);
        state.updated_at = Some(Local::now());
    }

    fn report_activity(&self, message: &str) {
        let mut state = self.lock_state();
        if state.activity.len() == ACTIVITY_CAPACITY {
            state.activity.pop_front();
        }
        state.activity.push_back(ActivityEntry {
            at: Local::now(),
            message: message.to_string(),
        });
        state.updated_at = Some(Local::now());
    }
}

// =============================================================================
// Activity Log
// =============================================================================

/// Append-only activity log. Opening or writing failures degrade to
/// warnings; the guard never stops over its log.
pub struct ActivityLog {
    file: Option<Mutex<File>>,
    path: PathBuf,
}

impl ActivityLog {
    /// Open for appending, creating parent directories. A log that cannot
    /// be opened yields a disabled instance that drops every line.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let file = match open_append(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                warn!("activity log {} unavailable: {e}", path.display());
                None
            }
        };
        Self {
            file,
            path: path.to_path_buf(),
        }
    }

    /// Append one timestamped line.
    pub fn append(&self, message: &str) {
        let Some(file) = &self.file else {
            return;
        };
        let stamp = Local::now().format(ACTIVITY_TIME_FORMAT);
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "[{stamp}] {message}") {
            warn!("activity log {} write failed: {e}", self.path.display());
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;

    fn device(mount: &str, read_accessible: bool, write_protected: bool) -> TrackedDevice {
        TrackedDevice {
            mount_point: PathBuf::from(mount),
            device: "/dev/sdz1".to_string(),
            connected_at: Local::now(),
            read_accessible,
            write_protected,
            protection_applied: true,
        }
    }

    #[test]
    fn classify_truth_table() {
        assert_eq!(classify(true, true), ProtectionOutcome::FullyProtected);
        assert_eq!(classify(true, false), ProtectionOutcome::PartialWriteAllowed);
        assert_eq!(classify(false, true), ProtectionOutcome::AccessFailed);
        assert_eq!(classify(false, false), ProtectionOutcome::AccessFailed);
    }

    #[test]
    fn only_fully_protected_counts_as_protected() {
        assert!(ProtectionOutcome::FullyProtected.is_protected());
        assert!(!ProtectionOutcome::PartialReadOnlyFailed.is_protected());
        assert!(!ProtectionOutcome::PartialWriteAllowed.is_protected());
        assert!(!ProtectionOutcome::AccessFailed.is_protected());
    }

    #[test]
    fn status_line_names_mount_and_outcome() {
        let line = device("/media/usb", true, true).status_line();
        assert_eq!(
            line,
            "/media/usb: fully protected (read allowed, writes blocked)"
        );
    }

    #[test]
    fn outcome_serializes_screaming_snake() {
        let json = serde_json::to_string(&ProtectionOutcome::PartialWriteAllowed).unwrap();
        assert_eq!(json, r#""PARTIAL_WRITE_ALLOWED""#);
    }

    #[test]
    fn board_upserts_by_mount_point() {
        let board = StatusBoard::new();
        board.report_device(&device("/media/usb", true, false));
        board.report_device(&device("/media/usb", true, true));
        board.report_device(&device("/media/other", false, false));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.devices.len(), 2);

        let usb = snapshot
            .devices
            .iter()
            .find(|d| d.mount_point == PathBuf::from("/media/usb"))
            .unwrap();
        assert!(usb.write_protected);
        assert!(snapshot.updated_at.is_some());
    }

    #[test]
    fn board_drops_removed_devices() {
        let board = StatusBoard::new();
        board.report_device(&device("/media/usb", true, true));
        board.report_removal(&device("/media/usb", true, true));

        assert!(board.snapshot().devices.is_empty());
    }

    #[test]
    fn board_snapshot_is_a_copy() {
        let board = StatusBoard::new();
        board.report_device(&device("/media/usb", true, true));

        let before = board.snapshot();
        board.report_removal(&device("/media/usb", true, true));

        assert_eq!(before.devices.len(), 1);
        assert!(board.snapshot().devices.is_empty());
    }

    #[test]
    fn board_activity_is_bounded() {
        let board = StatusBoard::new();
        for i in 0..ACTIVITY_CAPACITY + 5 {
            board.report_activity(&format!("line {i}"));
        }

        let snapshot = board.snapshot();
        assert_eq!(snapshot.activity.len(), ACTIVITY_CAPACITY);
        assert_eq!(snapshot.activity[0].message, "line 5");
        assert_eq!(
            snapshot.activity.last().unwrap().message,
            format!("line {}", ACTIVITY_CAPACITY + 4)
        );
    }

    #[test]
    fn activity_log_appends_timestamped_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/activity.log");

        let log = ActivityLog::open(&path);
        log.append("Volume guard started");
        log.append("Device removed: /media/usb (was protected)");

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Volume guard started"));
        assert!(lines[1].contains("was protected"));

        // "[YYYY-MM-DD HH:MM:SS] " prefix on every line.
        for line in lines {
            let stamp = &line[1..20];
            assert!(NaiveDateTime::parse_from_str(stamp, ACTIVITY_TIME_FORMAT).is_ok());
            assert_eq!(line.as_bytes()[0], b'[');
            assert_eq!(line.as_bytes()[20], b']');
        }
    }

    #[test]
    fn unopenable_activity_log_is_silent() {
        let log = ActivityLog::open(Path::new("/proc/no-such-dir/activity.log"));
        log.append("dropped");
    }

    #[test]
    fn tracked_device_serializes_camel_case() {
        let json = serde_json::to_value(device("/media/usb", true, true)).unwrap();
        assert_eq!(json["mountPoint"], "/media/usb");
        assert_eq!(json["readAccessible"], true);
        assert_eq!(json["writeProtected"], true);
        assert_eq!(json["protectionApplied"], true);
        assert!(json["connectedAt"].is_string());
    }
}

// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::GuardConfig;
use ghaf_usb_shield::exec::CommandRunner;
use ghaf_usb_shield::probe;
use ghaf_usb_shield::protect::{self, ProtectionReport};
use ghaf_usb_shield::status::{ActivityLog, StatusSink, TrackedDevice};
use ghaf_usb_shield::volumes::{is_removable, VolumeInfo, VolumeSource};

// =============================================================================
// Guard
// =============================================================================

pub struct Guard {
    config: GuardConfig,
    volumes: Arc<dyn VolumeSource>,
    runner: Arc<dyn CommandRunner>,
    sink: Arc<dyn StatusSink>,
    activity: ActivityLog,
    /// Previous snapshot; `None` until one enumeration has succeeded.
    previous: Option<BTreeSet<PathBuf>>,
    /// Devices that arrived while the guard was running and are still
    /// mounted. Volumes present at startup are baseline, not tracked.
    tracked: BTreeMap<PathBuf, TrackedDevice>,
}

/// Main guard loop: polls mounted volumes, protects and verifies
/// arrivals, reports departures.
impl Guard {
    pub fn new(
        config: GuardConfig,
        volumes: Arc<dyn VolumeSource>,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let activity = ActivityLog::open(&config.activity_log);
        Self {
            config,
            volumes,
            runner,
            sink,
            activity,
            previous: None,
            tracked: BTreeMap::new(),
        }
    }

    /// Run until `shutdown` is cancelled. Cancellation is honored between
    /// ticks; a tick in flight always finishes its pipeline first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "usb-shield-gate: starting (poll every {}s)",
            self.config.poll_interval_secs
        );
        self.report("Volume guard started");

        self.prime_baseline();

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires once immediately; the startup inventory
        // above already covered this instant.
        ticker.tick().await;

        info!("usb-shield-gate: ready");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!("usb-shield-gate: stopped");
        self.report("Volume guard stopped");
    }

    /// Take the startup inventory and make it the baseline. Volumes
    /// already mounted are logged but never treated as arrivals. On
    /// failure the baseline stays unset and the first successful tick
    /// takes its place.
    fn prime_baseline(&mut self) {
        match self.volumes.list_volumes() {
            Ok(volumes) => {
                info!("Startup inventory: {} mounted volumes", volumes.len());
                for volume in &volumes {
                    let class = if is_removable(volume, &self.config.classifier) {
                        "removable"
                    } else {
                        "fixed"
                    };
                    info!(
                        "  {} ({}, {}, {class})",
                        volume.mount_point.display(),
                        volume.device,
                        volume.fs_type
                    );
                }
                self.previous = Some(snapshot_of(&volumes));
            }
            Err(e) => {
                warn!("Startup enumeration failed, baseline deferred: {e}");
            }
        }
    }

    /// One poll tick: enumerate, diff against the previous snapshot,
    /// handle arrivals then departures. An enumeration failure skips the
    /// whole tick and leaves the previous snapshot in place.
    async fn tick(&mut self) {
        let current = match self.volumes.list_volumes() {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!("Volume enumeration failed, skipping tick: {e}");
                return;
            }
        };

        let snapshot = snapshot_of(&current);
        let Some(previous) = self.previous.as_ref() else {
            info!("Baseline established with {} volumes", snapshot.len());
            self.previous = Some(snapshot);
            return;
        };

        let (arrived, departed) = diff_snapshots(previous, &snapshot);
        self.previous = Some(snapshot);

        for mount_point in &arrived {
            if let Some(volume) = current.iter().find(|v| &v.mount_point == mount_point) {
                self.handle_arrival(volume).await;
            }
        }
        for mount_point in &departed {
            self.handle_departure(mount_point);
        }
    }

    /// Protect and verify one newly arrived volume. Runs to completion
    /// no matter how the individual steps fare; the device is tracked
    /// with whatever state verification found.
    async fn handle_arrival(&mut self, volume: &VolumeInfo) {
        if !is_removable(volume, &self.config.classifier) {
            debug!(
                "Ignoring fixed volume {} ({})",
                volume.mount_point.display(),
                volume.device
            );
            return;
        }

        info!(
            "Removable volume arrived: {} ({}, {}, options {:?})",
            volume.mount_point.display(),
            volume.device,
            volume.fs_type,
            volume.options
        );
        self.report(&format!(
            "Removable volume detected: {} ({})",
            volume.mount_point.display(),
            volume.device
        ));

        let connected_at = Local::now();

        let protection = if self.config.protection.enable {
            protect::apply(self.runner.as_ref(), &self.config.protection, volume).await
        } else {
            debug!("Protection pipeline disabled, skipping mechanisms");
            ProtectionReport::default()
        };

        let report = probe::verify(&volume.mount_point);

        let device = TrackedDevice {
            mount_point: volume.mount_point.clone(),
            device: volume.device.clone(),
            connected_at,
            read_accessible: report.read_accessible,
            write_protected: report.write_protected(),
            protection_applied: protection.completed(),
        };

        info!(
            "{} ({}): {}",
            volume.mount_point.display(),
            protection.summary(),
            device.outcome()
        );
        self.sink.report_device(&device);
        self.report(&device.status_line());
        self.tracked.insert(device.mount_point.clone(), device);
    }

    /// Drop a departed volume from tracking and report its last state.
    fn handle_departure(&mut self, mount_point: &Path) {
        let Some(device) = self.tracked.remove(mount_point) else {
            debug!("{} unmounted (was not tracked)", mount_point.display());
            return;
        };

        let state = if device.outcome().is_protected() {
            "was protected"
        } else {
            "was unprotected"
        };
        info!(
            "Removable volume departed: {} ({state})",
            mount_point.display()
        );
        self.sink.report_removal(&device);
        self.report(&format!(
            "Device removed: {} ({state})",
            mount_point.display()
        ));
    }

    fn report(&self, message: &str) {
        self.sink.report_activity(message);
        self.activity.append(message);
    }
}

// =============================================================================
// Snapshot Diffing
// =============================================================================

fn snapshot_of(volumes: &[VolumeInfo]) -> BTreeSet<PathBuf> {
    volumes.iter().map(|v| v.mount_point.clone()).collect()
}

/// Set difference in both directions: `(current - previous, previous -
/// current)`. Iterating the sorted sets keeps arrival and departure
/// handling in stable path order.
fn diff_snapshots(
    previous: &BTreeSet<PathBuf>,
    current: &BTreeSet<PathBuf>,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let arrived = current.difference(previous).cloned().collect();
    let departed = previous.difference(current).cloned().collect();
    (arrived, departed)
}

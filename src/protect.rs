// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Best-effort write-protection mechanisms.
//!
//! Three independent mechanisms run in a fixed order for every removable
//! arrival: a machine-global attach policy, the block-layer read-only flag,
//! and a permission denial on the mount root. A mechanism that fails is
//! logged and the sequence continues. Whether the volume is actually
//! protected is decided afterwards by the verification probes, never by
//! these exit codes; the mechanisms vary in applicability across filesystem
//! types and none of them is trusted on its own.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::exec::{CommandRunner, CommandSpec};
use crate::volumes::VolumeInfo;

// =============================================================================
// Constants
// =============================================================================

/// Udev rule marking removable block devices read-only as they attach.
const ATTACH_POLICY_RULE: &str = r#"ACTION=="add", SUBSYSTEM=="block", ATTRS{removable}=="1", RUN+="/sbin/blockdev --setro $devnode""#;

/// Number of mechanisms in the pipeline.
const MECHANISM_COUNT: usize = 3;

// =============================================================================
// Types
// =============================================================================

/// One of the three protection mechanisms, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Global udev policy: removable block devices attach read-only.
    AttachPolicy,
    /// Block-layer read-only flag on the backing device.
    BlockReadOnly,
    /// Permission-layer write denial on the mount root.
    AccessDenial,
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttachPolicy => write!(f, "attach policy"),
            Self::BlockReadOnly => write!(f, "block read-only"),
            Self::AccessDenial => write!(f, "access denial"),
        }
    }
}

/// Result of one mechanism attempt.
#[derive(Debug, Clone)]
pub struct MechanismReport {
    pub mechanism: Mechanism,
    /// The utility ran and exited zero. Confirmation is about the command,
    /// not the volume; only verification decides protection.
    pub confirmed: bool,
    /// Exit or error detail for the log line.
    pub detail: String,
}

/// Aggregate of one pipeline run over all mechanisms.
#[derive(Debug, Clone, Default)]
pub struct ProtectionReport {
    pub attempts: Vec<MechanismReport>,
}

impl ProtectionReport {
    /// Number of mechanisms whose command exited zero.
    #[must_use]
    pub fn confirmed(&self) -> usize {
        self.attempts.iter().filter(|a| a.confirmed).count()
    }

    /// True when every mechanism was attempted, i.e. the sequence ran to
    /// its end. Says nothing about the volume being protected.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.attempts.len() == MECHANISM_COUNT
    }

    /// Compact summary for status lines, e.g. `2/3 mechanisms confirmed`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}/{} mechanisms confirmed",
            self.confirmed(),
            self.attempts.len()
        )
    }
}

/// Settings for the protection pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtectionConfig {
    /// Master switch; disabled keeps watching and verifying only.
    pub enable: bool,

    /// Where the attach-policy udev rule is installed.
    pub policy_rules_path: PathBuf,

    /// Timeout for the policy reload command, in seconds.
    pub policy_timeout_secs: u64,

    /// Timeout for the block read-only command, in seconds.
    pub readonly_timeout_secs: u64,

    /// Timeout for each permission command, in seconds.
    pub access_timeout_secs: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enable: true,
            policy_rules_path: PathBuf::from("/run/udev/rules.d/90-usb-shield-readonly.rules"),
            policy_timeout_secs: 10,
            readonly_timeout_secs: 10,
            access_timeout_secs: 5,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Run all three mechanisms against one volume, in order, never stopping
/// early. Each attempt is reported individually and logged.
pub async fn apply(
    runner: &dyn CommandRunner,
    config: &ProtectionConfig,
    volume: &VolumeInfo,
) -> ProtectionReport {
    let report = ProtectionReport {
        attempts: vec![
            attach_policy(runner, config).await,
            block_read_only(runner, config, volume).await,
            access_denial(runner, config, volume).await,
        ],
    };

    for attempt in &report.attempts {
        if attempt.confirmed {
            info!(
                "{}: {} applied ({})",
                volume.mount_point.display(),
                attempt.mechanism,
                attempt.detail
            );
        } else {
            warn!(
                "{}: {} not confirmed ({})",
                volume.mount_point.display(),
                attempt.mechanism,
                attempt.detail
            );
        }
    }

    report
}

/// Mechanism 1: install the global attach policy and reload udev.
///
/// Coarse by design: every removable device attached from now on comes up
/// read-only until the rule file is removed. Does not touch devices that
/// are already attached, which is what mechanisms 2 and 3 are for.
async fn attach_policy(runner: &dyn CommandRunner, config: &ProtectionConfig) -> MechanismReport {
    let path = &config.policy_rules_path;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return not_confirmed(Mechanism::AttachPolicy, format!("rules dir: {e}"));
        }
    }
    if let Err(e) = fs::write(path, format!("{ATTACH_POLICY_RULE}\n")) {
        return not_confirmed(Mechanism::AttachPolicy, format!("rule install: {e}"));
    }
    debug!("attach policy rule installed at {}", path.display());

    let reload = CommandSpec::new(
        "udevadm",
        &["control", "--reload-rules"],
        Duration::from_secs(config.policy_timeout_secs),
    );
    run_step(runner, Mechanism::AttachPolicy, reload, "policy installed").await
}

/// Mechanism 2: flip the block-layer read-only flag on the backing device.
async fn block_read_only(
    runner: &dyn CommandRunner,
    config: &ProtectionConfig,
    volume: &VolumeInfo,
) -> MechanismReport {
    if !volume.device.starts_with("/dev/") {
        return not_confirmed(
            Mechanism::BlockReadOnly,
            format!("no block device behind '{}'", volume.device),
        );
    }

    let spec = CommandSpec::new(
        "blockdev",
        &["--setro", &volume.device],
        Duration::from_secs(config.readonly_timeout_secs),
    );
    run_step(
        runner,
        Mechanism::BlockReadOnly,
        spec,
        "device flagged read-only",
    )
    .await
}

/// Mechanism 3: permission denial on the mount root. The read/execute grant
/// is a best-effort precursor; confirmation follows the write-denial step.
async fn access_denial(
    runner: &dyn CommandRunner,
    config: &ProtectionConfig,
    volume: &VolumeInfo,
) -> MechanismReport {
    let root = volume.mount_point.display().to_string();
    let timeout = Duration::from_secs(config.access_timeout_secs);

    let grant = CommandSpec::new("chmod", &["a+rX", &root], timeout);
    match runner.run(&grant).await {
        Ok(output) if output.success() => debug!("read grant applied on {root}"),
        Ok(output) => debug!("read grant on {root} exited {}", output.exit_code),
        Err(e) => debug!("read grant on {root} failed: {e}"),
    }

    let deny = CommandSpec::new("chmod", &["a-w", &root], timeout);
    run_step(
        runner,
        Mechanism::AccessDenial,
        deny,
        "write permission removed",
    )
    .await
}

/// Run one command and fold its outcome into a report entry.
async fn run_step(
    runner: &dyn CommandRunner,
    mechanism: Mechanism,
    spec: CommandSpec,
    confirmed_detail: &str,
) -> MechanismReport {
    match runner.run(&spec).await {
        Ok(output) if output.success() => MechanismReport {
            mechanism,
            confirmed: true,
            detail: confirmed_detail.to_string(),
        },
        Ok(output) => {
            let why = output.brief();
            let detail = if why.is_empty() {
                format!("{} exited {}", spec.program, output.exit_code)
            } else {
                format!("{} exited {}: {why}", spec.program, output.exit_code)
            };
            not_confirmed(mechanism, detail)
        }
        Err(e) => not_confirmed(mechanism, format!("{}: {e}", spec.program)),
    }
}

fn not_confirmed(mechanism: Mechanism, detail: String) -> MechanismReport {
    MechanismReport {
        mechanism,
        confirmed: false,
        detail,
    }
}

// =============================================================================
// Tests
// =============================================================================

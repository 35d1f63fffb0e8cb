// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};
use serde::{Deserialize, Serialize};

use ghaf_usb_shield::protect::ProtectionConfig;
use ghaf_usb_shield::volumes::ClassifierConfig;

/// Guard daemon configuration. Every field has a default, so the daemon
/// runs without a configuration file.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardConfig {
    /// Seconds between volume polls (default: 3).
    pub poll_interval_secs: u64,

    /// Append-only activity log file.
    /// Default: /var/log/usb-shield/activity.log
    pub activity_log: PathBuf,

    /// Removable-media classification policy.
    pub classifier: ClassifierConfig,

    /// Protection pipeline settings.
    pub protection: ProtectionConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
            activity_log: PathBuf::from("/var/log/usb-shield/activity.log"),
            classifier: ClassifierConfig::default(),
            protection: ProtectionConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate the configuration.
    /// Returns `Ok(())` if valid, or `Err(Vec<String>)` with error messages.
    ///
    /// Only shapes are checked, not host state: media roots and the rules
    /// directory may not exist until the first device shows up.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors: Vec<String> = Vec::new();

        if self.poll_interval_secs == 0 {
            errors.push("pollIntervalSecs must be at least 1".to_string());
        }

        if !self.activity_log.is_absolute() {
            errors.push("activityLog must be an absolute path".to_string());
        }

        if !self.classifier.system_volume.is_absolute() {
            errors.push("classifier.systemVolume must be an absolute path".to_string());
        }
        for root in &self.classifier.media_roots {
            if !root.is_absolute() {
                errors.push(format!(
                    "classifier.mediaRoots entry '{}' must be an absolute path",
                    root.display()
                ));
            }
        }

        if !self.protection.policy_rules_path.is_absolute() {
            errors.push("protection.policyRulesPath must be an absolute path".to_string());
        }
        if self
            .protection
            .policy_rules_path
            .extension()
            .is_none_or(|ext| ext != "rules")
        {
            errors.push(
                "protection.policyRulesPath must end in .rules (udev ignores other files)"
                    .to_string(),
            );
        }

        for (field, secs) in [
            ("policyTimeoutSecs", self.protection.policy_timeout_secs),
            ("readonlyTimeoutSecs", self.protection.readonly_timeout_secs),
            ("accessTimeoutSecs", self.protection.access_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(format!("protection.{field} must be at least 1"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load and validate configuration, falling back to defaults when no
    /// file is given.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let Some(path) = config_path else {
            info!("No configuration file given, using defaults");
            let config = Self::default();
            config.log_config_info();
            return Ok(config);
        };

        let config_data = fs::read(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self =
            serde_json::from_slice(&config_data).context("Failed to parse config JSON")?;

        if let Err(errors) = config.validate() {
            for err in &errors {
                error!("Configuration: {err}");
            }
            anyhow::bail!("Configuration has {} error(s)", errors.len());
        }

        info!("Loaded configuration from {}", path.display());
        config.log_config_info();
        Ok(config)
    }

    /// Log configuration info at startup.
    fn log_config_info(&self) {
        if !self.protection.enable {
            info!("Protection mechanisms disabled (watch and verify only)");
        }
        info!(
            "Polling every {}s, media roots {:?}, activity log {}",
            self.poll_interval_secs,
            self.classifier.media_roots,
            self.activity_log.display()
        );
    }
}

/// Verify configuration file without starting the daemon.
pub fn verify_config(config_path: &Path) -> Result<()> {
    let config_data = fs::read(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let config: GuardConfig =
        serde_json::from_slice(&config_data).context("Failed to parse config JSON")?;

    match config.validate() {
        Ok(()) => {
            eprintln!("Configuration valid");
            Ok(())
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("{err}");
            }
            anyhow::bail!("Configuration has {} error(s)", errors.len());
        }
    }
}

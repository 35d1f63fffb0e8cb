// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Write-protection guard library for removable volumes.
//!
//! Watches the set of mounted volumes, classifies new arrivals as removable
//! or fixed, applies best-effort OS write-protection mechanisms to removable
//! arrivals, and verifies the result empirically with read/write probes.
//! Protection status is always derived from the probes, never from the
//! mechanism exit codes.
//!
//! # Modules
//!
//! - [`volumes`] - Mount-table enumeration and removable-media classification
//! - [`protect`] - Best-effort protection mechanisms
//! - [`probe`] - Empirical read/write verification
//! - [`status`] - Outcome classification, status board, activity log
//! - [`exec`] - Bounded execution of OS utilities

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

pub mod exec;
pub mod probe;
pub mod protect;
pub mod status;
pub mod util;
pub mod volumes;

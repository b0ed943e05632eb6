// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Additive device risk score.

use bastion_core::types::{DeviceSecurityStatus, RiskLevel};

const COMPROMISED: u32 = 40;
const HOOKING: u32 = 30;
const DEBUGGING: u32 = 20;
const NO_SCREEN_LOCK: u32 = 15;
const EMULATOR: u32 = 10;

/// Sum of the weights of every unsafe condition present.
pub fn risk_score(status: &DeviceSecurityStatus) -> u32 {
    [
        (status.is_compromised(), COMPROMISED),
        (status.has_hooking_framework, HOOKING),
        (status.is_debugging_enabled, DEBUGGING),
        (!status.has_screen_lock, NO_SCREEN_LOCK),
        (status.is_emulator, EMULATOR),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, weight)| weight)
    .sum()
}

pub fn level_for_score(score: u32) -> RiskLevel {
    match score {
        70.. => RiskLevel::Critical,
        40..=69 => RiskLevel::High,
        20..=39 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

pub fn risk_level(status: &DeviceSecurityStatus) -> RiskLevel {
    level_for_score(risk_score(status))
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Bastion native platform bridge abstractions.
//!
//! Defines the capability traits the security subsystem needs from the host
//! OS (secure key storage, device identity, screen-lock and biometric state,
//! runtime inspection) and picks the implementation for the target.

pub mod memory;
pub mod traits;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(not(target_os = "android"))]
pub mod stub;

use std::sync::Arc;

pub use memory::{MemoryBridge, MemoryKeychain};
pub use traits::*;

/// Build the bridge implementation for the target operating system.
pub fn platform_bridge() -> Arc<dyn traits::PlatformBridge> {
    #[cfg(target_os = "android")]
    {
        // Android: JNI calls into the ART runtime.
        Arc::new(android::AndroidBridge::new())
    }
    #[cfg(not(target_os = "android"))]
    {
        // Desktop/CI and iOS hosts that inject their own bridge.
        Arc::new(stub::StubBridge)
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Constants and data types shared by Warden components.

/// Guest assets (kernel, image, firmware...) and custom asset overrides.
pub mod asset;

/// Hypervisor capability flags.
pub mod capabilities;

/// Configuration information for hypervisors.
pub mod config;

/// Convenience macro to obtain the scoped logger
#[macro_export]
macro_rules! sl {
    () => {
        slog_scope::logger().new(slog::o!("subsystem" => "warden-types"))
    };
}

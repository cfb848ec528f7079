// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

/// Default configuration values.
pub mod default;

pub mod hypervisor;

pub use self::hypervisor::{ConfigError, HypervisorConfig, Param};

/// Warden run dir
pub const WARDEN_PATH: &str = "/run/warden";

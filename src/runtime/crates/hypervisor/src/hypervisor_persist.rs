// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Persisted hypervisor state.
//!
//! The state is an opaque blob to everything above the driver: it is written
//! by [`crate::Hypervisor::save_state`], carried around as bytes, and handed
//! back to [`crate::Hypervisor::load_state`] unchanged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::HypervisorConfig;

/// Serialized state of one hypervisor driver instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HypervisorState {
    /// String form of the driver's `HypervisorType`.
    pub hypervisor_type: String,

    /// Sandbox id the VM belongs to.
    pub id: String,

    /// Per-VM state directory.
    pub vm_path: String,

    /// Whether the VM process runs jailed.
    pub jailed: bool,

    /// Jailer root directory.
    pub jailer_root: String,

    /// Network namespace the VM is attached to.
    pub netns: Option<String>,

    /// Hypervisor related process ids, hypervisor pid first.
    pub pids: Vec<u32>,

    /// Pid of the virtiofs daemon, when one is running.
    pub virtiofs_pid: Option<u32>,

    /// The configuration the VM was created with.
    pub config: HypervisorConfig,
}

impl HypervisorState {
    /// Create an empty state for a driver of the given type.
    pub fn new(hypervisor_type: &str) -> Self {
        HypervisorState {
            hypervisor_type: hypervisor_type.to_owned(),
            ..Default::default()
        }
    }

    /// Serialize to an opaque byte payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize hypervisor state")
    }

    /// Deserialize from an opaque byte payload produced by `to_bytes`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("deserialize hypervisor state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::config::hypervisor::Param;

    #[test]
    fn test_state_bytes_round_trip() {
        let mut state = HypervisorState::new("mock");
        state.id = "sandbox-1".to_string();
        state.vm_path = "/run/warden/sandbox-1".to_string();
        state.pids = vec![4242];
        state
            .config
            .add_kernel_param(Param::new("console", "ttyS0"))
            .unwrap();

        let bytes = state.to_bytes().unwrap();
        let restored = HypervisorState::from_bytes(&bytes).unwrap();

        assert_eq!(restored.hypervisor_type, "mock");
        assert_eq!(restored.id, state.id);
        assert_eq!(restored.vm_path, state.vm_path);
        assert_eq!(restored.pids, state.pids);
        assert_eq!(restored.config.kernel_params, state.config.kernel_params);
    }

    #[test]
    fn test_state_from_garbage() {
        assert!(HypervisorState::from_bytes(b"not json").is_err());
    }
}

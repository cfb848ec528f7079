// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Empirical VM-creation probes.
//!
//! Static flag and module checks can lie; the only proof that a host can
//! create a VM is creating one. Each probe performs a real create/destroy
//! cycle against the virtualization device of its VMM family and tears the
//! throwaway VM down again.

pub mod acrn;
pub mod kvm;

use anyhow::{anyhow, Result};
use hypervisor::HypervisorType;

pub use acrn::ProbeError;

/// Prove that `hypervisor_type` can create a VM on this host.
///
/// The remote backend delegates the question to its peer and the mock is
/// accepted unconditionally, so neither is probed.
pub fn host_can_create_vm(hypervisor_type: &HypervisorType) -> Result<()> {
    use HypervisorType::*;

    match hypervisor_type {
        Qemu | Firecracker | CloudHypervisor | Dragonball => kvm::check_kvm_is_usable(),
        Acrn => acrn::check_acrn_is_usable().map_err(Into::into),
        Remote | Mock => Ok(()),
        hypervisor_type => Err(anyhow!(
            "cannot probe VM creation for hypervisor type {}",
            hypervisor_type
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_bypass() {
        assert!(host_can_create_vm(&HypervisorType::Remote).is_ok());
        assert!(host_can_create_vm(&HypervisorType::Mock).is_ok());
    }

    #[test]
    fn test_probe_unsupported_type() {
        assert!(host_can_create_vm(&HypervisorType::VirtFramework).is_err());
    }
}

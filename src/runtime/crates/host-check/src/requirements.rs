// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The capability policy: which CPU flags, CPU attributes and kernel modules
//! a (VMM family, CPU vendor) combination requires.
//!
//! The policy is computed by a pure function and returned by value; callers
//! thread the result around explicitly, so concurrent checks for different
//! VMM types can never observe each other's state.

use anyhow::{anyhow, Result};
use hypervisor::HypervisorType;

use crate::cpu::CpuVendor;

pub const CPU_FLAG_VMX: &str = "vmx";
pub const CPU_FLAG_SVM: &str = "svm";
pub const CPU_FLAG_LM: &str = "lm";
pub const CPU_FLAG_SSE4_1: &str = "sse4_1";

pub const MODULE_KVM: &str = "kvm";
pub const MODULE_KVM_INTEL: &str = "kvm_intel";
pub const MODULE_KVM_AMD: &str = "kvm_amd";
pub const MODULE_VHOST: &str = "vhost";
pub const MODULE_VHOST_NET: &str = "vhost_net";
pub const MODULE_VHOST_VSOCK: &str = "vhost_vsock";

const MSG_VIRT_SUPPORT: &str = "Virtualization support";
const MSG_64BIT_CPU: &str = "64Bit CPU";
const MSG_SSE4_1: &str = "SSE4.1";
const MSG_KERNEL_VM: &str = "Kernel-based Virtual Machine";
const MSG_KERNEL_VIRTIO: &str = "Host kernel accelerator for virtio";
const MSG_KERNEL_VIRTIO_NET: &str = "Host kernel accelerator for virtio network";
const MSG_KERNEL_VIRTIO_VSOCK: &str = "Host Support for Linux VM Sockets";

/// A required CPU flag or attribute, with a human readable description.
#[derive(Clone, Debug, PartialEq)]
pub struct Requirement {
    pub name: &'static str,
    pub desc: &'static str,
}

/// A kernel module parameter expected to hold a given value.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleParam {
    pub name: &'static str,
    pub value: &'static str,
}

/// A kernel module the policy cares about. A missing required module fails
/// the capability check; a missing optional one only warrants a warning.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelModule {
    pub name: &'static str,
    pub desc: &'static str,
    pub required: bool,
    pub params: Vec<ModuleParam>,
}

/// Everything a host must provide for the selected VMM family.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapabilityRequirements {
    pub cpu_flags: Vec<Requirement>,
    pub cpu_attribs: Vec<Requirement>,
    pub kernel_modules: Vec<KernelModule>,
}

fn kvm_cpu_flags(virt_flag: &'static str) -> Vec<Requirement> {
    vec![
        Requirement {
            name: virt_flag,
            desc: MSG_VIRT_SUPPORT,
        },
        Requirement {
            name: CPU_FLAG_LM,
            desc: MSG_64BIT_CPU,
        },
        Requirement {
            name: CPU_FLAG_SSE4_1,
            desc: MSG_SSE4_1,
        },
    ]
}

fn vhost_modules(required: bool) -> Vec<KernelModule> {
    vec![
        KernelModule {
            name: MODULE_VHOST,
            desc: MSG_KERNEL_VIRTIO,
            required,
            params: vec![],
        },
        KernelModule {
            name: MODULE_VHOST_NET,
            desc: MSG_KERNEL_VIRTIO_NET,
            required,
            params: vec![],
        },
        KernelModule {
            name: MODULE_VHOST_VSOCK,
            desc: MSG_KERNEL_VIRTIO_VSOCK,
            required: false,
            params: vec![],
        },
    ]
}

fn intel_kvm_requirements(running_on_vmm: bool) -> CapabilityRequirements {
    // "VMX Unrestricted mode support". This is used as a heuristic to
    // determine if the host CPU is new enough, and only applies when not
    // already nested inside another VM.
    let kvm_intel_params = if running_on_vmm {
        vec![]
    } else {
        vec![ModuleParam {
            name: "unrestricted_guest",
            value: "Y",
        }]
    };

    let mut kernel_modules = vec![
        KernelModule {
            name: MODULE_KVM,
            desc: MSG_KERNEL_VM,
            required: true,
            params: vec![],
        },
        KernelModule {
            name: MODULE_KVM_INTEL,
            desc: "Intel KVM",
            required: true,
            params: kvm_intel_params,
        },
    ];
    kernel_modules.append(&mut vhost_modules(true));

    CapabilityRequirements {
        cpu_flags: kvm_cpu_flags(CPU_FLAG_VMX),
        cpu_attribs: vec![Requirement {
            name: "GenuineIntel",
            desc: "Intel Architecture CPU",
        }],
        kernel_modules,
    }
}

fn amd_kvm_requirements() -> CapabilityRequirements {
    let mut kernel_modules = vec![
        KernelModule {
            name: MODULE_KVM,
            desc: MSG_KERNEL_VM,
            required: true,
            params: vec![],
        },
        KernelModule {
            name: MODULE_KVM_AMD,
            desc: "AMD KVM",
            required: true,
            params: vec![],
        },
    ];
    kernel_modules.append(&mut vhost_modules(true));

    CapabilityRequirements {
        cpu_flags: kvm_cpu_flags(CPU_FLAG_SVM),
        cpu_attribs: vec![Requirement {
            name: "AuthenticAMD",
            desc: "AMD Architecture CPU",
        }],
        kernel_modules,
    }
}

fn acrn_requirements() -> CapabilityRequirements {
    // ACRN does its own vmx handling, so no virtualization extension flag is
    // demanded here.
    CapabilityRequirements {
        cpu_flags: vec![
            Requirement {
                name: CPU_FLAG_LM,
                desc: MSG_64BIT_CPU,
            },
            Requirement {
                name: CPU_FLAG_SSE4_1,
                desc: MSG_SSE4_1,
            },
        ],
        cpu_attribs: vec![Requirement {
            name: "GenuineIntel",
            desc: "Intel Architecture CPU",
        }],
        kernel_modules: vhost_modules(false),
    }
}

/// Compute the capability requirements for running `hypervisor_type` on a
/// host with the given CPU `vendor`. `running_on_vmm` tells whether this
/// process already runs nested inside a VM.
pub fn requirements(
    hypervisor_type: &HypervisorType,
    vendor: CpuVendor,
    running_on_vmm: bool,
) -> Result<CapabilityRequirements> {
    use HypervisorType::*;

    match (hypervisor_type, vendor) {
        (Qemu | Firecracker | CloudHypervisor | Dragonball | Mock, CpuVendor::Intel) => {
            Ok(intel_kvm_requirements(running_on_vmm))
        }
        (Qemu | Firecracker | CloudHypervisor | Dragonball, CpuVendor::Amd) => {
            Ok(amd_kvm_requirements())
        }
        (Acrn, CpuVendor::Intel) => Ok(acrn_requirements()),
        // Nothing is enforced for remote delegation, and mock accepts any
        // CPU it has no policy row for.
        (Remote | Mock, _) => Ok(CapabilityRequirements::default()),
        (Acrn, vendor) => Err(anyhow!(
            "the acrn hypervisor requires an Intel CPU, detected {}",
            vendor
        )),
        (hypervisor_type, CpuVendor::Unknown) => Err(anyhow!(
            "unknown CPU vendor for hypervisor type {}",
            hypervisor_type
        )),
        (hypervisor_type, vendor) => Err(anyhow!(
            "no capability policy for hypervisor type {} on {} CPUs",
            hypervisor_type,
            vendor
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module<'a>(reqs: &'a CapabilityRequirements, name: &str) -> &'a KernelModule {
        reqs.kernel_modules
            .iter()
            .find(|module| module.name == name)
            .unwrap_or_else(|| panic!("module {} not in requirements", name))
    }

    #[test]
    fn test_intel_kvm_policy() {
        for hypervisor_type in [
            HypervisorType::Qemu,
            HypervisorType::Firecracker,
            HypervisorType::CloudHypervisor,
            HypervisorType::Dragonball,
            HypervisorType::Mock,
        ] {
            let reqs = requirements(&hypervisor_type, CpuVendor::Intel, false).unwrap();

            let flag_names: Vec<_> = reqs.cpu_flags.iter().map(|f| f.name).collect();
            assert_eq!(flag_names, vec!["vmx", "lm", "sse4_1"]);
            assert_eq!(reqs.cpu_attribs[0].name, "GenuineIntel");

            assert!(module(&reqs, MODULE_KVM).required);
            assert!(module(&reqs, MODULE_KVM_INTEL).required);
            assert!(module(&reqs, MODULE_VHOST).required);
            assert!(module(&reqs, MODULE_VHOST_NET).required);
            assert!(!module(&reqs, MODULE_VHOST_VSOCK).required);
        }
    }

    #[test]
    fn test_unrestricted_guest_only_when_not_nested() {
        let reqs = requirements(&HypervisorType::Qemu, CpuVendor::Intel, false).unwrap();
        assert_eq!(
            module(&reqs, MODULE_KVM_INTEL).params,
            vec![ModuleParam {
                name: "unrestricted_guest",
                value: "Y",
            }]
        );

        // Nested hosts do not get the unrestricted guest requirement.
        let reqs = requirements(&HypervisorType::Qemu, CpuVendor::Intel, true).unwrap();
        assert!(module(&reqs, MODULE_KVM_INTEL).params.is_empty());
    }

    #[test]
    fn test_amd_kvm_policy() {
        let reqs = requirements(&HypervisorType::Qemu, CpuVendor::Amd, false).unwrap();

        let flag_names: Vec<_> = reqs.cpu_flags.iter().map(|f| f.name).collect();
        assert_eq!(flag_names, vec!["svm", "lm", "sse4_1"]);
        assert_eq!(reqs.cpu_attribs[0].name, "AuthenticAMD");

        assert!(module(&reqs, MODULE_KVM).required);
        assert!(module(&reqs, MODULE_KVM_AMD).required);
        assert!(module(&reqs, MODULE_KVM_AMD).params.is_empty());
    }

    #[test]
    fn test_acrn_policy() {
        let reqs = requirements(&HypervisorType::Acrn, CpuVendor::Intel, false).unwrap();

        // No virtualization extension flag for acrn.
        let flag_names: Vec<_> = reqs.cpu_flags.iter().map(|f| f.name).collect();
        assert_eq!(flag_names, vec!["lm", "sse4_1"]);

        // All modules optional.
        assert!(reqs.kernel_modules.iter().all(|module| !module.required));

        // acrn demands an Intel CPU.
        assert!(requirements(&HypervisorType::Acrn, CpuVendor::Amd, false).is_err());
        assert!(requirements(&HypervisorType::Acrn, CpuVendor::Unknown, false).is_err());
    }

    #[test]
    fn test_bypass_policy() {
        // remote enforces nothing anywhere; mock falls back to the bypass
        // row for vendors it has no policy for.
        for vendor in [CpuVendor::Intel, CpuVendor::Amd, CpuVendor::Unknown] {
            let reqs = requirements(&HypervisorType::Remote, vendor, false).unwrap();
            assert_eq!(reqs, CapabilityRequirements::default());
        }

        let reqs = requirements(&HypervisorType::Mock, CpuVendor::Amd, false).unwrap();
        assert_eq!(reqs, CapabilityRequirements::default());
    }

    #[test]
    fn test_unknown_vendor_is_hard_error() {
        assert!(requirements(&HypervisorType::Qemu, CpuVendor::Unknown, false).is_err());
        assert!(requirements(&HypervisorType::Dragonball, CpuVendor::Unknown, false).is_err());
    }

    #[test]
    fn test_unsupported_type() {
        assert!(requirements(&HypervisorType::VirtFramework, CpuVendor::Intel, false).is_err());
    }
}

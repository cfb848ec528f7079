// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The host capability preflight.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use hypervisor::HypervisorType;

use crate::cpu::{self, PROC_CPUINFO};
use crate::probe;
use crate::requirements::{self, CapabilityRequirements};

/// Root of the module tree exported by the kernel.
pub const SYSFS_MODULE_PATH: &str = "/sys/module";

/// Verify the static host requirements: CPU flags, CPU attributes and kernel
/// modules. All missing required entries are reported in one error; missing
/// optional modules only produce warnings.
pub fn check_host_is_vm_capable(
    reqs: &CapabilityRequirements,
    cpu_info_path: &str,
    sysfs_module_path: &str,
) -> Result<()> {
    let mut missing: Vec<String> = Vec::new();

    if !reqs.cpu_flags.is_empty() {
        let flags = cpu::get_cpu_flags(cpu_info_path)?;
        for flag in &reqs.cpu_flags {
            if !flags.contains(flag.name) {
                missing.push(format!("CPU flag {} ({})", flag.name, flag.desc));
            }
        }
    }

    if !reqs.cpu_attribs.is_empty() {
        let cpu_info = fs::read_to_string(cpu_info_path)?;
        for attrib in &reqs.cpu_attribs {
            if !cpu_info.split_whitespace().any(|field| field == attrib.name) {
                missing.push(format!("CPU attribute {} ({})", attrib.name, attrib.desc));
            }
        }
    }

    for module in &reqs.kernel_modules {
        let module_dir = Path::new(sysfs_module_path).join(module.name);
        if !module_dir.is_dir() {
            if module.required {
                missing.push(format!("kernel module {} ({})", module.name, module.desc));
            } else {
                warn!(sl!(), "optional kernel module not loaded";
                    "module" => module.name, "description" => module.desc);
            }
            continue;
        }

        for param in &module.params {
            let param_path = module_dir.join("parameters").join(param.name);
            let value = fs::read_to_string(&param_path).unwrap_or_default();
            if value.trim() != param.value {
                let detail = format!(
                    "kernel module parameter {}.{} is not {}",
                    module.name, param.name, param.value
                );
                if module.required {
                    missing.push(detail);
                } else {
                    warn!(sl!(), "{}", detail);
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "host is missing required capabilities:\n  {}",
            missing.join("\n  ")
        ))
    }
}

/// Run the whole preflight for `hypervisor_type`: detect the CPU, compute
/// the capability requirements, verify them, then prove VM creation
/// empirically.
pub fn check(hypervisor_type: &HypervisorType) -> Result<()> {
    let vendor = cpu::detect_cpu_vendor(PROC_CPUINFO)?;
    let on_vmm = cpu::running_on_vmm(PROC_CPUINFO)?;

    let reqs = requirements::requirements(hypervisor_type, vendor, on_vmm)?;
    check_host_is_vm_capable(&reqs, PROC_CPUINFO, SYSFS_MODULE_PATH)?;

    probe::host_can_create_vm(hypervisor_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuVendor;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    struct FakeHost {
        _dir: tempfile::TempDir,
        cpu_info_path: String,
        sysfs_module_path: String,
    }

    // Build a fake procfs/sysfs tree: a cpuinfo file plus a module tree with
    // parameter files.
    fn fake_host(cpu_info: &str, modules: &[(&str, &[(&str, &str)])]) -> FakeHost {
        let dir = tempdir().unwrap();

        let cpu_info_path = dir.path().join("cpuinfo");
        let mut cpu_info_file = File::create(&cpu_info_path).unwrap();
        writeln!(cpu_info_file, "{}", cpu_info).unwrap();

        let module_root = dir.path().join("module");
        for (name, params) in modules {
            let parameters_dir = module_root.join(name).join("parameters");
            fs::create_dir_all(&parameters_dir).unwrap();
            for (param, value) in *params {
                fs::write(parameters_dir.join(param), format!("{}\n", value)).unwrap();
            }
        }

        FakeHost {
            cpu_info_path: cpu_info_path.to_string_lossy().into_owned(),
            sysfs_module_path: module_root.to_string_lossy().into_owned(),
            _dir: dir,
        }
    }

    const INTEL_CPU_INFO: &str =
        "processor : 0\nvendor_id : GenuineIntel\nflags : vmx lm sse4_1 fpu\n";

    const ALL_INTEL_MODULES: &[(&str, &[(&str, &str)])] = &[
        ("kvm", &[]),
        ("kvm_intel", &[("unrestricted_guest", "Y")]),
        ("vhost", &[]),
        ("vhost_net", &[]),
        ("vhost_vsock", &[]),
    ];

    #[test]
    fn test_capable_intel_host() {
        let host = fake_host(INTEL_CPU_INFO, ALL_INTEL_MODULES);
        let reqs =
            requirements::requirements(&HypervisorType::Qemu, CpuVendor::Intel, false).unwrap();

        check_host_is_vm_capable(&reqs, &host.cpu_info_path, &host.sysfs_module_path).unwrap();
    }

    #[test]
    fn test_missing_cpu_flag() {
        let host = fake_host(
            "vendor_id : GenuineIntel\nflags : lm sse4_1\n",
            ALL_INTEL_MODULES,
        );
        let reqs =
            requirements::requirements(&HypervisorType::Qemu, CpuVendor::Intel, false).unwrap();

        let err = check_host_is_vm_capable(&reqs, &host.cpu_info_path, &host.sysfs_module_path)
            .unwrap_err();
        assert!(err.to_string().contains("vmx"), "{}", err);
    }

    #[test]
    fn test_missing_required_module() {
        let host = fake_host(
            INTEL_CPU_INFO,
            &[
                ("kvm", &[]),
                ("kvm_intel", &[("unrestricted_guest", "Y")]),
                ("vhost", &[]),
                // vhost_net missing (required), vhost_vsock missing (optional)
            ],
        );
        let reqs =
            requirements::requirements(&HypervisorType::Qemu, CpuVendor::Intel, false).unwrap();

        let err = check_host_is_vm_capable(&reqs, &host.cpu_info_path, &host.sysfs_module_path)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("vhost_net"), "{}", message);
        // optional modules never fail the check
        assert!(!message.contains("vhost_vsock"), "{}", message);
    }

    #[test]
    fn test_module_parameter_mismatch() {
        let host = fake_host(
            INTEL_CPU_INFO,
            &[
                ("kvm", &[]),
                ("kvm_intel", &[("unrestricted_guest", "N")]),
                ("vhost", &[]),
                ("vhost_net", &[]),
            ],
        );
        let reqs =
            requirements::requirements(&HypervisorType::Qemu, CpuVendor::Intel, false).unwrap();

        let err = check_host_is_vm_capable(&reqs, &host.cpu_info_path, &host.sysfs_module_path)
            .unwrap_err();
        assert!(err.to_string().contains("unrestricted_guest"), "{}", err);

        // When nested, the parameter is not demanded at all.
        let reqs =
            requirements::requirements(&HypervisorType::Qemu, CpuVendor::Intel, true).unwrap();
        check_host_is_vm_capable(&reqs, &host.cpu_info_path, &host.sysfs_module_path).unwrap();
    }

    #[test]
    fn test_empty_requirements_need_no_host_files() {
        let reqs = CapabilityRequirements::default();
        check_host_is_vm_capable(&reqs, "/does/not/exist", "/does/not/exist").unwrap();
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Confidential-computing guest protection detection.
//!
//! Detection is advisory: hosts without any protection technology are the
//! common case, so [`available_guest_protections`] reports an empty list
//! instead of propagating detection errors.

#[cfg(target_arch = "x86_64")]
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(any(
    target_arch = "x86_64",
    all(target_arch = "powerpc64", target_endian = "little")
))]
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[cfg(any(
    target_arch = "s390x",
    all(target_arch = "powerpc64", target_endian = "little")
))]
use nix::unistd::Uid;

/// TDX module version information.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct TdxDetails {
    pub major_version: u32,
    pub minor_version: u32,
}

/// The guest protection technology a host supports; at most one is active.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub enum GuestProtection {
    #[default]
    NoProtection,
    /// Intel Trust Domain Extensions.
    Tdx(TdxDetails),
    /// AMD Secure Encrypted Virtualization.
    Sev,
    /// AMD SEV with Secure Nested Paging.
    Snp,
    /// IBM POWER Protected Execution Facility.
    Pef,
    /// IBM Secure Execution (IBM Z & LinuxONE).
    Se,
}

impl fmt::Display for GuestProtection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GuestProtection::NoProtection => write!(f, "none"),
            GuestProtection::Tdx(_) => write!(f, "tdx"),
            GuestProtection::Sev => write!(f, "sev"),
            GuestProtection::Snp => write!(f, "snp"),
            GuestProtection::Pef => write!(f, "pef"),
            GuestProtection::Se => write!(f, "se"),
        }
    }
}

/// Guest protection detection failure.
#[derive(Error, Debug)]
pub enum ProtectionError {
    #[error("no permission to check guest protection")]
    NoPerms,

    #[error("failed to check guest protection: {0}")]
    CheckFailed(String),

    #[error("invalid guest protection value: {0}")]
    InvalidValue(String),

    #[error("cannot resolve path {0} below {1}: {2}")]
    CannotResolvePath(String, PathBuf, anyhow::Error),

    #[error("expected file {0} not found: {1}")]
    FileMissing(String, std::io::Error),

    #[error("file {0} contains unexpected content: {1}")]
    FileInvalid(PathBuf, anyhow::Error),
}

/// List the protection technologies available on this host: one name, or
/// nothing. Detection errors are swallowed on purpose, protection is not a
/// requirement for VM creation on non-confidential hosts.
pub fn available_guest_protections() -> Vec<String> {
    match available_guest_protection() {
        Ok(GuestProtection::NoProtection) | Err(_) => Vec::new(),
        Ok(protection) => vec![protection.to_string()],
    }
}

#[cfg(target_arch = "x86_64")]
pub const TDX_SYS_FIRMWARE_DIR: &str = "/sys/firmware/tdx/";
#[cfg(target_arch = "x86_64")]
pub const SEV_KVM_PARAMETER_PATH: &str = "/sys/module/kvm_amd/parameters/sev";
#[cfg(target_arch = "x86_64")]
pub const SNP_KVM_PARAMETER_PATH: &str = "/sys/module/kvm_amd/parameters/sev_snp";

// Module directory below TDX_SYS_FIRMWARE_DIR.
#[cfg(target_arch = "x86_64")]
const TDX_FW_MODULE_DIR: &str = "tdx_module";

// Files in TDX_FW_MODULE_DIR holding the TDX module version.
#[cfg(target_arch = "x86_64")]
const TDX_MAJOR_FILE: &str = "major_version";
#[cfg(target_arch = "x86_64")]
const TDX_MINOR_FILE: &str = "minor_version";

/// Detect the protection technology this host supports.
#[cfg(target_arch = "x86_64")]
pub fn available_guest_protection() -> Result<GuestProtection, ProtectionError> {
    arch_guest_protection(
        TDX_SYS_FIRMWARE_DIR,
        SEV_KVM_PARAMETER_PATH,
        SNP_KVM_PARAMETER_PATH,
    )
}

#[cfg(target_arch = "x86_64")]
pub fn arch_guest_protection(
    tdx_path: &str,
    sev_path: &str,
    snp_path: &str,
) -> Result<GuestProtection, ProtectionError> {
    let metadata = fs::metadata(tdx_path);

    if metadata.is_ok() && metadata.unwrap().is_dir() {
        let module_dir = safe_path::scoped_join(tdx_path, TDX_FW_MODULE_DIR).map_err(|e| {
            ProtectionError::CannotResolvePath(
                TDX_FW_MODULE_DIR.to_string(),
                PathBuf::from(tdx_path),
                anyhow!(e),
            )
        })?;

        let major_version = read_tdx_version_file(&module_dir, TDX_MAJOR_FILE)?;
        let minor_version = read_tdx_version_file(&module_dir, TDX_MINOR_FILE)?;

        return Ok(GuestProtection::Tdx(TdxDetails {
            major_version,
            minor_version,
        }));
    }

    let check_contents = |file_name: &str| -> Result<bool, ProtectionError> {
        if !std::path::Path::new(file_name).exists() {
            return Ok(false);
        }

        let contents = fs::read_to_string(file_name).map_err(|err| {
            ProtectionError::CheckFailed(format!("error reading file {}: {}", file_name, err))
        })?;

        Ok(contents.trim() == "Y")
    };

    if check_contents(snp_path)? {
        return Ok(GuestProtection::Snp);
    }

    if check_contents(sev_path)? {
        return Ok(GuestProtection::Sev);
    }

    Ok(GuestProtection::NoProtection)
}

#[cfg(target_arch = "x86_64")]
fn read_tdx_version_file(module_dir: &PathBuf, name: &str) -> Result<u32, ProtectionError> {
    const HEX_BASE: u32 = 16;
    const HEX_PREFIX: &str = "0x";

    let version_file = safe_path::scoped_join(module_dir, name).map_err(|e| {
        ProtectionError::CannotResolvePath(name.to_string(), module_dir.clone(), anyhow!(e))
    })?;

    let version_str = fs::read_to_string(&version_file).map_err(|e| {
        ProtectionError::FileMissing(version_file.to_string_lossy().into(), e)
    })?;
    let version_str = version_str.trim().trim_start_matches(HEX_PREFIX);

    u32::from_str_radix(version_str, HEX_BASE)
        .map_err(|e| ProtectionError::FileInvalid(version_file, anyhow!(e)))
}

#[cfg(target_arch = "s390x")]
pub fn available_guest_protection() -> Result<GuestProtection, ProtectionError> {
    if !Uid::effective().is_root() {
        return Err(ProtectionError::NoPerms);
    }

    // Secure Execution
    // https://www.kernel.org/doc/html/latest/virt/kvm/s390-pv.html
    let se_cpu_facility_bit: u32 = 158;

    let facilities = crate::cpu::retrieve_cpu_facilities().map_err(|err| {
        ProtectionError::CheckFailed(format!("error retrieving CPU facilities: {}", err))
    })?;
    if !facilities.contains(&se_cpu_facility_bit) {
        return Ok(GuestProtection::NoProtection);
    }

    let cmdline_values = ["1", "on", "y", "yes"];
    let se_cmdline_param = "prot_virt";

    let se_cmdline_present =
        crate::cpu::check_cmdline(crate::cpu::PROC_CMDLINE, se_cmdline_param, &cmdline_values)
            .map_err(|err| ProtectionError::CheckFailed(err.to_string()))?;

    if !se_cmdline_present {
        return Err(ProtectionError::InvalidValue(String::from(
            "protected virtualization is not enabled on the kernel command line",
        )));
    }

    Ok(GuestProtection::Se)
}

#[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
const PEF_SYS_FIRMWARE_DIR: &str = "/sys/firmware/ultravisor/";

#[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
pub fn available_guest_protection() -> Result<GuestProtection, ProtectionError> {
    if !Uid::effective().is_root() {
        return Err(ProtectionError::NoPerms);
    }

    let metadata = fs::metadata(PEF_SYS_FIRMWARE_DIR);
    if metadata.is_ok() && metadata.unwrap().is_dir() {
        return Ok(GuestProtection::Pef);
    }

    Ok(GuestProtection::NoProtection)
}

// Guest protection is not supported on other architectures.
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "s390x",
    all(target_arch = "powerpc64", target_endian = "little")
)))]
pub fn available_guest_protection() -> Result<GuestProtection, ProtectionError> {
    Ok(GuestProtection::NoProtection)
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! CPU and kernel command line probing.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Host CPU information.
pub const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// Host kernel command line.
pub const PROC_CMDLINE: &str = "/proc/cmdline";

const CPU_VENDOR_INTEL: &str = "GenuineIntel";
const CPU_VENDOR_AMD: &str = "AuthenticAMD";

const CPU_FLAGS_FIELD: &str = "flags";

// CPU flag set by hypervisors for their guests; its presence means this
// process itself runs inside a VM.
#[cfg(target_arch = "x86_64")]
const NESTED_VM_FLAG: &str = "hypervisor";

/// CPU vendor families the capability policy distinguishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuVendor::Intel => write!(f, "Intel"),
            CpuVendor::Amd => write!(f, "AMD"),
            CpuVendor::Unknown => write!(f, "unknown"),
        }
    }
}

/// Detect the CPU vendor from a cpuinfo-style text source. The first vendor
/// substring found anywhere in the file wins; neither one present means
/// [`CpuVendor::Unknown`].
pub fn detect_cpu_vendor<P: AsRef<Path>>(cpu_info_path: P) -> Result<CpuVendor> {
    let path = cpu_info_path.as_ref();
    let cpu_info = fs::read_to_string(path)
        .with_context(|| format!("read CPU info from {}", path.display()))?;

    if cpu_info.contains(CPU_VENDOR_INTEL) {
        Ok(CpuVendor::Intel)
    } else if cpu_info.contains(CPU_VENDOR_AMD) {
        Ok(CpuVendor::Amd)
    } else {
        Ok(CpuVendor::Unknown)
    }
}

/// Collect the CPU flag set from a cpuinfo-style text source.
///
/// The flags live on the first line whose leading field starts with `flags`,
/// as space-separated tokens after that field. A source without such a line
/// is an error.
pub fn get_cpu_flags<P: AsRef<Path>>(cpu_info_path: P) -> Result<HashSet<String>> {
    let path = cpu_info_path.as_ref();
    let cpu_info = fs::read_to_string(path)
        .with_context(|| format!("read CPU info from {}", path.display()))?;

    for line in cpu_info.lines() {
        // Expected format: ["flags", ":", ...] or ["flags:", ...]
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some(first) if first.starts_with(CPU_FLAGS_FIELD) => {
                return Ok(fields
                    .filter(|field| *field != ":")
                    .map(|field| field.to_owned())
                    .collect());
            }
            _ => continue,
        }
    }

    Err(anyhow!(
        "could not find \"{}\" field in {}",
        CPU_FLAGS_FIELD,
        path.display()
    ))
}

/// Check whether this process itself runs inside a VM.
#[cfg(target_arch = "x86_64")]
pub fn running_on_vmm<P: AsRef<Path>>(cpu_info_path: P) -> Result<bool> {
    let flags = get_cpu_flags(cpu_info_path)?;

    Ok(flags.contains(NESTED_VM_FLAG))
}

/// Check whether this process itself runs inside a VM.
///
/// Flag-based detection only exists on x86; on other architectures this
/// deliberately weak heuristic reports not-nested without error.
#[cfg(not(target_arch = "x86_64"))]
pub fn running_on_vmm<P: AsRef<Path>>(_cpu_info_path: P) -> Result<bool> {
    info!(sl!(), "unable to know if the system is running inside a VM");

    Ok(false)
}

/// Collect the CPU facility bits from the cpuinfo `facilities` line.
#[cfg(target_arch = "s390x")]
pub fn retrieve_cpu_facilities() -> Result<HashSet<u32>> {
    let cpu_info = fs::read_to_string(PROC_CPUINFO)
        .with_context(|| format!("read CPU info from {}", PROC_CPUINFO))?;

    for line in cpu_info.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some(first) if first.starts_with("facilities") => {
                return Ok(fields
                    .filter(|field| *field != ":")
                    .filter_map(|field| field.parse().ok())
                    .collect());
            }
            _ => continue,
        }
    }

    Err(anyhow!(
        "could not find \"facilities\" field in {}",
        PROC_CPUINFO
    ))
}

/// Check whether an option or parameter is present in the kernel command
/// line. Search is case-insensitive. With no `search_values`, a bare match of
/// `search_param` is enough; otherwise the parameter value must match one of
/// `search_values`.
pub fn check_cmdline<P: AsRef<Path>>(
    cmdline_path: P,
    search_param: &str,
    search_values: &[&str],
) -> Result<bool> {
    let path = cmdline_path.as_ref();
    let cmdline = fs::read_to_string(path)
        .with_context(|| format!("read kernel command line from {}", path.display()))?;

    for line in cmdline.lines() {
        for field in line.split_whitespace() {
            if search_values.is_empty() {
                if field.eq_ignore_ascii_case(search_param) {
                    return Ok(true);
                }
            } else if let Some((key, value)) = field.split_once('=') {
                if key.eq_ignore_ascii_case(search_param)
                    && search_values
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(value))
                {
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}

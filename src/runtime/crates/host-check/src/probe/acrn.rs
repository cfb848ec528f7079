// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! ACRN probe: prove VM creation against the ACRN hypervisor service module.
//!
//! All raw ioctl plumbing for the ACRN control device lives in this file; the
//! binary layout below is a fixed wire contract with the kernel driver and
//! must not leak out of this module.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

/// The ACRN hypervisor service module control device.
pub const ACRN_DEVICE: &str = "/dev/acrn_hsm";

// Mainline Linux does not carry the ACRN UAPI headers, so the request codes
// are spelled out as raw values.
const ACRN_IOCTL_CREATE_VM: libc::c_ulong = 0xC030A210;
const ACRN_IOCTL_PAUSE_VM: libc::c_ulong = 0xA213;
const ACRN_IOCTL_DESTROY_VM: libc::c_ulong = 0xA211;

nix::ioctl_write_ptr_bad!(acrn_create_vm, ACRN_IOCTL_CREATE_VM, AcrnVmCreation);
nix::ioctl_none_bad!(acrn_pause_vm, ACRN_IOCTL_PAUSE_VM);
nix::ioctl_none_bad!(acrn_destroy_vm, ACRN_IOCTL_DESTROY_VM);

const ACRN_VM_NAME_LEN: usize = 16;
const ACRN_IO_REQUEST_PAGE_SIZE: usize = 4096;

// Name carried by the throwaway probe VM; at most ACRN_VM_NAME_LEN bytes.
const PROBE_VM_NAME: &[u8] = b"warden-probe-vm";

/// Create-VM request, layout fixed by the ACRN HSM driver ABI.
#[repr(C)]
pub struct AcrnVmCreation {
    pub vmid: u16,
    pub reserved0: u16,
    pub vcpu_num: u16,
    pub reserved1: u16,
    pub name: [u8; ACRN_VM_NAME_LEN],
    pub vm_flag: u64,
    pub ioreq_buf: u64,
    pub cpu_affinity: u64,
}

/// Failure modes of the empirical VM-creation probes.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The control device could not be opened.
    #[error("failed to open {0}: {1}")]
    OpenDevice(String, std::io::Error),

    /// Another hypervisor instance currently holds the device.
    #[error("cannot create VM, another hypervisor is running")]
    DeviceBusy,

    /// The create-VM control request failed.
    #[error("create VM request failed: {0}")]
    CreateVm(Errno),

    /// The pause-VM control request failed.
    #[error("pause VM request failed: {0}")]
    PauseVm(Errno),

    /// The destroy-VM control request failed.
    #[error("destroy VM request failed: {0}")]
    DestroyVm(Errno),
}

/// Determine whether a full VM can be created under ACRN, by running a
/// create/pause/destroy cycle against the control device.
pub fn check_acrn_is_usable() -> Result<(), ProbeError> {
    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(ACRN_DEVICE)
        .map_err(|e| ProbeError::OpenDevice(ACRN_DEVICE.to_string(), e))?;
    info!(sl!(), "device available"; "device" => ACRN_DEVICE);

    // The device handle is dropped, and with it closed, on every path out of
    // probe_acrn.
    probe_acrn(&device)
}

fn probe_acrn(device: &File) -> Result<(), ProbeError> {
    let fd = device.as_raw_fd();

    // Page-sized buffer shared with the hypervisor for I/O requests; it must
    // outlive the VM, which the destroy request below guarantees.
    let mut io_request_page = Box::new([0u8; ACRN_IO_REQUEST_PAGE_SIZE]);

    let mut create_vm = AcrnVmCreation {
        vmid: 0,
        reserved0: 0,
        vcpu_num: 0,
        reserved1: 0,
        name: [0u8; ACRN_VM_NAME_LEN],
        vm_flag: 0,
        ioreq_buf: io_request_page.as_mut_ptr() as u64,
        cpu_affinity: 0,
    };
    create_vm.name[..PROBE_VM_NAME.len()].copy_from_slice(PROBE_VM_NAME);

    if let Err(errno) = unsafe { acrn_create_vm(fd, &create_vm) } {
        if errno == Errno::EBUSY {
            error!(sl!(), "cannot create VM"; "reason" => "another hypervisor running");
            return Err(ProbeError::DeviceBusy);
        }
        return Err(ProbeError::CreateVm(errno));
    }

    unsafe { acrn_pause_vm(fd) }.map_err(ProbeError::PauseVm)?;
    unsafe { acrn_destroy_vm(fd) }.map_err(ProbeError::DestroyVm)?;

    info!(sl!(), "feature available"; "feature" => "create-vm");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_vm_creation_layout() {
        // The structure is a wire contract with the kernel driver: 8 bytes of
        // ids and counts, a 16 byte name, then three 64-bit fields.
        assert_eq!(mem::size_of::<AcrnVmCreation>(), 48);
        assert_eq!(mem::align_of::<AcrnVmCreation>(), 8);
    }

    #[test]
    fn test_probe_vm_name_fits() {
        assert!(PROBE_VM_NAME.len() <= ACRN_VM_NAME_LEN);
    }

    // Exercises the full create/pause/destroy cycle. Needs root and an ACRN
    // host; when the device is held by another hypervisor the probe must
    // report the busy condition distinctly.
    #[test]
    fn test_acrn_is_usable() {
        test_utils::skip_if_not_root!();
        test_utils::skip_if_path_missing!(ACRN_DEVICE);

        match check_acrn_is_usable() {
            Ok(()) => {}
            Err(ProbeError::DeviceBusy) => {
                println!("INFO: {} held by another hypervisor", ACRN_DEVICE);
            }
            Err(other) => panic!("unexpected probe failure: {}", other),
        }
    }
}

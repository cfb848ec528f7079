// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! KVM probe: prove VM creation against the generic virtualization device.

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::close;
use nix::{ioctl_write_int_bad, request_code_none};
use std::os::unix::io::RawFd;

// we do not want to issue syscalls to any device besides /dev/kvm
const KVM_DEVICE: &str = "/dev/kvm";

// constants specific to kvm ioctls found in kvm.h
const KVM_IOCTL_ID: u8 = 0xAE;
const KVM_GET_API_VERSION: u8 = 0x00;
const KVM_CREATE_VM: u8 = 0x01;

// per kvm api documentation, this number should always be 12
// https://www.kernel.org/doc/html/latest/virt/kvm/api.html#kvm-get-api-version
const API_VERSION: i32 = 12;

ioctl_write_int_bad!(
    kvm_api_version,
    request_code_none!(KVM_IOCTL_ID, KVM_GET_API_VERSION)
);
ioctl_write_int_bad!(
    kvm_create_vm,
    request_code_none!(KVM_IOCTL_ID, KVM_CREATE_VM)
);

/// Determine whether a full VM can be created, by creating a minimal VM and
/// then deleting it.
pub fn check_kvm_is_usable() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(anyhow!("will not perform KVM checks as non-root user"));
    }

    // since the file is not being created, the mode argument is irrelevant
    let mode = Mode::empty();
    let flags = OFlag::O_RDWR | OFlag::O_CLOEXEC;
    let fd = open(KVM_DEVICE, flags, mode).with_context(|| format!("open {}", KVM_DEVICE))?;

    let result = probe_kvm(fd);

    let _ = close(fd);

    result
}

fn probe_kvm(fd: RawFd) -> Result<()> {
    // 0 is not used but required to produce output
    let version = unsafe { kvm_api_version(fd, 0) }.context("KVM_GET_API_VERSION")?;
    if version != API_VERSION {
        return Err(anyhow!("unexpected KVM API version {}", version));
    }

    // 0 is the default machine type
    match unsafe { kvm_create_vm(fd, 0) } {
        Ok(vm_fd) => {
            let _ = close(vm_fd);
            Ok(())
        }
        Err(Errno::EBUSY) => Err(anyhow!(
            "another hypervisor is running: KVM_CREATE_VM: {}",
            Errno::EBUSY
        )),
        Err(errno) => Err(anyhow!("KVM_CREATE_VM failed: {}", errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kvm_check_refused_for_non_root() {
        test_utils::skip_if_root!();

        let err = check_kvm_is_usable().unwrap_err();
        assert_eq!(
            err.to_string(),
            "will not perform KVM checks as non-root user"
        );
    }

    // Proves the end to end create/destroy cycle; needs root and a
    // virtualization capable host.
    #[test]
    fn test_kvm_is_usable() {
        test_utils::skip_if_not_root!();
        test_utils::skip_if_path_missing!(KVM_DEVICE);

        check_kvm_is_usable().unwrap();
    }
}

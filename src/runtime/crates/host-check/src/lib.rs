// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Host capability verification.
//!
//! Before the runtime creates a hardware-virtualized sandbox it asks this
//! crate whether the host can actually support one: the CPU vendor and flag
//! set are probed, the kernel modules required for the selected VMM family
//! are verified, and finally VM creation is proven empirically by a
//! create/destroy cycle against the virtualization device.

#[macro_use]
extern crate slog;

macro_rules! sl {
    () => {
        slog_scope::logger().new(o!("subsystem" => "host-check"))
    };
}

pub mod check;
pub mod cpu;
pub mod probe;
pub mod protection;
pub mod requirements;

pub use check::check;
pub use cpu::{check_cmdline, detect_cpu_vendor, get_cpu_flags, running_on_vmm, CpuVendor};
pub use probe::host_can_create_vm;
pub use protection::{available_guest_protection, available_guest_protections, GuestProtection};
pub use requirements::{requirements, CapabilityRequirements, KernelModule};

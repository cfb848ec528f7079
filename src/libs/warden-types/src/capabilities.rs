// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use bitmask_enum::bitmask;

/// Feature flags a hypervisor backend may support.
#[bitmask(u8)]
pub enum CapabilityBits {
    /// Hypervisor supports use of block devices.
    BlockDeviceSupport,
    /// Hypervisor supports block device hotplug.
    BlockDeviceHotplugSupport,
    /// Hypervisor supports multi-queue devices.
    MultiQueueSupport,
    /// Hypervisor supports filesystem sharing with the guest.
    FsSharingSupport,
    /// Hypervisor supports hybrid-vsock (firecracker/dragonball style).
    HybridVsockSupport,
    /// Hypervisor supports memory hotplug probe interface.
    GuestMemoryProbe,
    /// Hypervisor has a built-in disk/network rate limiter.
    RateLimiterSupport,
}

/// The set of capabilities a hypervisor backend exposes.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    flags: CapabilityBits,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Capabilities {
            flags: CapabilityBits::none(),
        }
    }

    /// Replace the capability set.
    pub fn set(&mut self, flags: CapabilityBits) {
        self.flags = flags;
    }

    /// Add flags to the capability set.
    pub fn add(&mut self, flags: CapabilityBits) {
        self.flags |= flags;
    }

    /// Whether block devices are supported.
    pub fn is_block_device_supported(&self) -> bool {
        self.flags.and(CapabilityBits::BlockDeviceSupport) != 0
    }

    /// Whether block device hotplug is supported.
    pub fn is_block_device_hotplug_supported(&self) -> bool {
        self.flags.and(CapabilityBits::BlockDeviceHotplugSupport) != 0
    }

    /// Whether multi-queue devices are supported.
    pub fn is_multi_queue_supported(&self) -> bool {
        self.flags.and(CapabilityBits::MultiQueueSupport) != 0
    }

    /// Whether filesystem sharing is supported.
    pub fn is_fs_sharing_supported(&self) -> bool {
        self.flags.and(CapabilityBits::FsSharingSupport) != 0
    }

    /// Whether hybrid-vsock is supported.
    pub fn is_hybrid_vsock_supported(&self) -> bool {
        self.flags.and(CapabilityBits::HybridVsockSupport) != 0
    }

    /// Whether the memory hotplug probe interface is supported.
    pub fn is_mem_hotplug_probe_supported(&self) -> bool {
        self.flags.and(CapabilityBits::GuestMemoryProbe) != 0
    }

    /// Whether the hypervisor ships a built-in rate limiter.
    pub fn is_rate_limiter_supported(&self) -> bool {
        self.flags.and(CapabilityBits::RateLimiterSupport) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let mut cap = Capabilities::new();
        assert!(!cap.is_block_device_supported());

        cap.set(CapabilityBits::BlockDeviceSupport);
        assert!(cap.is_block_device_supported());
        assert!(!cap.is_block_device_hotplug_supported());

        cap.add(CapabilityBits::FsSharingSupport | CapabilityBits::HybridVsockSupport);
        assert!(cap.is_block_device_supported());
        assert!(cap.is_fs_sharing_supported());
        assert!(cap.is_hybrid_vsock_supported());
        assert!(!cap.is_rate_limiter_supported());

        // set() replaces the whole set
        cap.set(CapabilityBits::RateLimiterSupport);
        assert!(cap.is_rate_limiter_supported());
        assert!(!cap.is_block_device_supported());
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Device descriptors handed to the hypervisor for cold plug and hotplug.

use std::fmt;

/// Configuration for the guest boot image device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageConfig {
    /// Host path of the image file.
    pub path: String,
}

/// Configuration for a shared filesystem device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShareFsConfig {
    /// Mount tag seen by the guest.
    pub mount_tag: String,

    /// Host directory shared into the guest.
    pub host_shared_path: String,
}

/// Configuration for a network device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkConfig {
    /// Interface name inside the guest.
    pub virt_iface_name: String,

    /// Host device the interface is backed by.
    pub host_dev_name: String,

    /// Guest MAC address, when fixed.
    pub guest_mac: Option<String>,
}

/// Configuration for a block device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockConfig {
    /// Host path backing the block device.
    pub path_on_host: String,

    /// Device index, used to predict the device name in the guest.
    pub index: u64,

    /// Whether the device is exposed read-only.
    pub is_readonly: bool,
}

/// Configuration for a serial port device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SerialConfig {
    /// Host unix socket connected to the port.
    pub socket_path: String,
}

/// Configuration for a vhost-vsock PCI device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VsockConfig {
    /// A 32-bit Context Identifier (CID) used to identify the guest.
    pub guest_cid: u32,

    /// Port the guest agent listens on.
    pub port: u32,
}

/// Configuration for a VFIO passthrough device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VfioConfig {
    /// Sysfs path of the host device.
    pub host_path: String,

    /// PCI bus/device/function of the host device.
    pub bus_slot_func: String,
}

/// Configuration for a vhost-user device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VhostUserConfig {
    /// Unix socket of the vhost-user backend.
    pub socket_path: String,

    /// MAC address, for vhost-user-net devices.
    pub mac_address: String,
}

/// A batch of vCPUs to hotplug.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CpuDevice {
    /// Number of vCPUs to add or remove.
    pub count: u32,
}

/// A hotplugged memory region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryDevice {
    /// Memory slot index; must be unique within a running VM.
    pub slot: u32,

    /// Region size in MiB.
    pub size_mb: u32,

    /// Guest physical address of the region.
    pub addr: u64,

    /// Whether the region was added through the probe interface.
    pub probe: bool,
}

/// Configuration for a hybrid vsock device backed by a host unix socket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HybridVsockConfig {
    /// unix domain socket path
    pub uds_path: String,

    /// Port the guest agent listens on.
    pub port: u32,
}

/// Socket handle owned by a remote hypervisor service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteSock {
    /// Sandbox the socket belongs to.
    pub sandbox_id: String,
}

/// A device descriptor together with its kind, as passed to
/// [`crate::Hypervisor::add_device`] and the hotplug calls.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceType {
    Image(ImageConfig),
    ShareFs(ShareFsConfig),
    Network(NetworkConfig),
    Block(BlockConfig),
    Serial(SerialConfig),
    VsockPci(VsockConfig),
    Vfio(VfioConfig),
    VhostUser(VhostUserConfig),
    Cpu(CpuDevice),
    Memory(MemoryDevice),
    HybridVsock(HybridVsockConfig),
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

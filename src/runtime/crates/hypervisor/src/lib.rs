// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The hypervisor abstraction of the Warden runtime.
//!
//! Every virtual machine monitor backend implements the [`Hypervisor`]
//! lifecycle contract, so the rest of the runtime never has to know which
//! VMM is in use. Drivers are obtained from the registry by
//! [`HypervisorType`].

#[macro_use]
extern crate slog;

macro_rules! sl {
    () => {
        slog_scope::logger().new(o!("subsystem" => "hypervisor"))
    };
}

pub mod device;
pub mod hypervisor_persist;
pub mod mock;
mod param;
pub mod registry;
pub mod remote;
pub mod utils;

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub use device::{DeviceType, HybridVsockConfig, MemoryDevice, RemoteSock, VsockConfig};
pub use hypervisor_persist::HypervisorState;
pub use param::{deserialize_params, serialize_params, Param};
pub use registry::{get_hypervisor_socket_template, new_hypervisor, register_hypervisor_driver};
pub use warden_types::capabilities::{Capabilities, CapabilityBits};
pub use warden_types::config::hypervisor::HypervisorConfig;

/// Name of the hybrid vsock socket below the jailer root.
pub const DEFAULT_HYBRID_VSOCK_NAME: &str = "warden.hvsock";

/// Name of the jailer root directory below the sandbox path.
pub const JAILER_ROOT: &str = "root";

/// The closed set of supported VMM families.
///
/// The string form round-trips through `FromStr`/`Display`; parsing an
/// unknown name is a hard error.
#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, strum_macros::Display, strum_macros::EnumString,
)]
pub enum HypervisorType {
    /// The QEMU full emulator.
    #[strum(serialize = "qemu")]
    Qemu,
    /// The Firecracker microVM monitor.
    #[strum(serialize = "firecracker")]
    Firecracker,
    /// Cloud Hypervisor.
    #[strum(serialize = "clh")]
    CloudHypervisor,
    /// The Dragonball built-in VMM.
    #[strum(serialize = "dragonball")]
    Dragonball,
    /// The ACRN hypervisor.
    #[strum(serialize = "acrn")]
    Acrn,
    /// Delegation to a remote hypervisor service.
    #[strum(serialize = "remote")]
    Remote,
    /// The Darwin Virtualization.framework hypervisor.
    #[strum(serialize = "virtframework")]
    VirtFramework,
    /// In-process mock for testing.
    #[strum(serialize = "mock")]
    Mock,
}

impl HypervisorType {
    /// Parse a hypervisor type from its string form.
    pub fn parse(value: &str) -> Result<Self> {
        Self::from_str(value).map_err(|_| anyhow!("unknown hypervisor type {}", value))
    }
}

/// Driver internal lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum VmmState {
    NotReady,
    VmReady,
    VmRunning,
    VmPaused,
}

/// vcpu mapping from vcpu number to thread number
#[derive(Debug, Default)]
pub struct VcpuThreadIds {
    pub vcpus: HashMap<u32, u32>,
}

/// Opaque handle to the sandbox network, as passed to VM creation. Endpoint
/// construction happens above this layer.
#[derive(Clone, Debug, Default)]
pub struct NetworkHandle {
    /// Path to the network namespace the VM attaches to, if any.
    pub netns: Option<String>,
}

/// Socket handle a backend exposes for host/guest communication.
#[derive(Clone, Debug, PartialEq)]
pub enum VmSocket {
    /// vhost-vsock with a context id.
    Vsock(VsockConfig),
    /// Hybrid vsock backed by a unix socket on the host.
    HybridVsock(HybridVsockConfig),
    /// Socket owned by a remote hypervisor service.
    Remote(RemoteSock),
}

/// The lifecycle contract every VMM backend driver satisfies.
///
/// A driver must be configured with [`Hypervisor::set_config`] before any
/// lifecycle call; calls made earlier are rejected. Hotplug and resize calls
/// are only valid while the VM is running or paused and are serialized
/// against concurrent lifecycle transitions by the driver itself.
#[async_trait]
pub trait Hypervisor: std::fmt::Debug + Send + Sync {
    // vm manager
    async fn set_config(&self, config: HypervisorConfig) -> Result<()>;
    async fn hypervisor_config(&self) -> Result<HypervisorConfig>;
    async fn create_vm(&self, id: &str, network: NetworkHandle) -> Result<()>;
    async fn start_vm(&self, timeout_secs: i32) -> Result<()>;
    async fn attest_vm(&self) -> Result<()>;
    /// If `wait_only` is set, don't actively stop the VM: just perform
    /// cleanup bookkeeping.
    async fn stop_vm(&self, wait_only: bool) -> Result<()>;
    async fn pause_vm(&self) -> Result<()>;
    async fn resume_vm(&self) -> Result<()>;
    async fn save_vm(&self) -> Result<()>;
    async fn disconnect(&self);
    async fn cleanup(&self) -> Result<()>;

    // device manager
    async fn add_device(&self, device: DeviceType) -> Result<()>;
    async fn hotplug_add_device(&self, device: DeviceType) -> Result<DeviceType>;
    async fn hotplug_remove_device(&self, device: DeviceType) -> Result<DeviceType>;

    // resource control, best-effort: the returned values may fall short of
    // the request when the backend cannot satisfy it exactly.
    async fn resize_memory(
        &self,
        new_mem_mb: u32,
        block_size_mb: u32,
        probe: bool,
    ) -> Result<(u32, MemoryDevice)>;
    async fn resize_vcpus(&self, new_vcpus: u32) -> Result<(u32, u32)>; // returns (old_vcpus, new_vcpus)

    // introspection
    async fn get_total_memory_mb(&self) -> Result<u32>;
    async fn get_thread_ids(&self) -> Result<VcpuThreadIds>;
    /// Hypervisor related process ids; the hypervisor pid is at index 0.
    async fn get_pids(&self) -> Result<Vec<u32>>;
    async fn get_virtio_fs_pid(&self) -> Option<u32>;
    async fn get_vm_console(&self, id: &str) -> Result<(String, String)>;
    async fn capabilities(&self) -> Result<Capabilities>;
    /// Whether the backend ships its own disk/network rate limiter.
    async fn is_rate_limiter_builtin(&self) -> bool;
    async fn check(&self) -> Result<()>;

    // state persistence
    async fn save_state(&self) -> Result<HypervisorState>;
    async fn load_state(&self, state: HypervisorState) -> Result<()>;

    /// Generate the socket used to communicate between host and guest.
    async fn generate_socket(&self, id: &str) -> Result<VmSocket>;
}

/// Returns the hypervisor's own process id, by contract held at index 0 of
/// [`Hypervisor::get_pids`].
pub async fn get_hypervisor_pid(hypervisor: &dyn Hypervisor) -> Result<u32> {
    let pids = hypervisor.get_pids().await?;
    pids.first()
        .copied()
        .ok_or_else(|| anyhow!("hypervisor has no process ids"))
}

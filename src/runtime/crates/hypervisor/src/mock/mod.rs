// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! An in-process mock backend.
//!
//! The mock keeps the whole VM as in-memory bookkeeping while still enforcing
//! the ordering rules of the lifecycle contract, which makes it useful both
//! for tests and for wiring the runtime without hardware virtualization.

mod inner;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use inner::MockInner;

use crate::device::{DeviceType, MemoryDevice};
use crate::{
    Capabilities, Hypervisor, HypervisorConfig, HypervisorState, NetworkHandle, VcpuThreadIds,
    VmSocket,
};

#[derive(Debug)]
pub struct MockHypervisor {
    inner: Arc<RwLock<MockInner>>,
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockInner::new())),
        }
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn set_config(&self, config: HypervisorConfig) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.set_config(config)
    }

    async fn hypervisor_config(&self) -> Result<HypervisorConfig> {
        let inner = self.inner.read().await;
        inner.hypervisor_config()
    }

    async fn create_vm(&self, id: &str, network: NetworkHandle) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.create_vm(id, network)
    }

    async fn start_vm(&self, timeout_secs: i32) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.start_vm(timeout_secs)
    }

    async fn attest_vm(&self) -> Result<()> {
        let inner = self.inner.read().await;
        inner.attest_vm()
    }

    async fn stop_vm(&self, wait_only: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.stop_vm(wait_only)
    }

    async fn pause_vm(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.pause_vm()
    }

    async fn resume_vm(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.resume_vm()
    }

    async fn save_vm(&self) -> Result<()> {
        let inner = self.inner.read().await;
        inner.save_vm()
    }

    async fn disconnect(&self) {}

    async fn cleanup(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.cleanup()
    }

    async fn add_device(&self, device: DeviceType) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.add_device(device)
    }

    async fn hotplug_add_device(&self, device: DeviceType) -> Result<DeviceType> {
        let mut inner = self.inner.write().await;
        inner.hotplug_add_device(device)
    }

    async fn hotplug_remove_device(&self, device: DeviceType) -> Result<DeviceType> {
        let mut inner = self.inner.write().await;
        inner.hotplug_remove_device(device)
    }

    async fn resize_memory(
        &self,
        new_mem_mb: u32,
        block_size_mb: u32,
        probe: bool,
    ) -> Result<(u32, MemoryDevice)> {
        let mut inner = self.inner.write().await;
        inner.resize_memory(new_mem_mb, block_size_mb, probe)
    }

    async fn resize_vcpus(&self, new_vcpus: u32) -> Result<(u32, u32)> {
        let mut inner = self.inner.write().await;
        inner.resize_vcpus(new_vcpus)
    }

    async fn get_total_memory_mb(&self) -> Result<u32> {
        let inner = self.inner.read().await;
        inner.get_total_memory_mb()
    }

    async fn get_thread_ids(&self) -> Result<VcpuThreadIds> {
        let inner = self.inner.read().await;
        inner.get_thread_ids()
    }

    async fn get_pids(&self) -> Result<Vec<u32>> {
        let inner = self.inner.read().await;
        inner.get_pids()
    }

    async fn get_virtio_fs_pid(&self) -> Option<u32> {
        None
    }

    async fn get_vm_console(&self, _id: &str) -> Result<(String, String)> {
        let inner = self.inner.read().await;
        inner.get_vm_console()
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        let inner = self.inner.read().await;
        inner.capabilities()
    }

    async fn is_rate_limiter_builtin(&self) -> bool {
        false
    }

    async fn check(&self) -> Result<()> {
        let inner = self.inner.read().await;
        inner.check()
    }

    async fn save_state(&self) -> Result<HypervisorState> {
        let inner = self.inner.read().await;
        inner.save_state()
    }

    async fn load_state(&self, state: HypervisorState) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.load_state(state)
    }

    async fn generate_socket(&self, id: &str) -> Result<VmSocket> {
        let inner = self.inner.read().await;
        inner.generate_socket(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;

    async fn configured_mock() -> MockHypervisor {
        let hypervisor = MockHypervisor::new();
        let mut config = HypervisorConfig::default();
        config.default_max_vcpus = 4;
        config.default_max_memory_mb = 4096;
        hypervisor.set_config(config).await.unwrap();
        hypervisor
    }

    async fn running_mock() -> MockHypervisor {
        let hypervisor = MockHypervisor::new();
        let mut config = HypervisorConfig::default();
        config.default_max_vcpus = 4;
        config.default_max_memory_mb = 4096;
        hypervisor.set_config(config).await.unwrap();
        hypervisor
            .create_vm("sandbox-1", NetworkHandle::default())
            .await
            .unwrap();
        hypervisor.start_vm(10).await.unwrap();
        hypervisor
    }

    #[tokio::test]
    async fn test_lifecycle_requires_config() {
        let hypervisor = MockHypervisor::new();
        assert!(hypervisor
            .create_vm("sandbox-1", NetworkHandle::default())
            .await
            .is_err());
        assert!(hypervisor.generate_socket("sandbox-1").await.is_err());
        assert!(hypervisor.check().await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_ordering() {
        let hypervisor = running_mock().await;

        // Starting twice is rejected.
        assert!(hypervisor.start_vm(10).await.is_err());

        hypervisor.pause_vm().await.unwrap();
        // Pausing a paused VM is rejected.
        assert!(hypervisor.pause_vm().await.is_err());

        hypervisor.resume_vm().await.unwrap();
        hypervisor.stop_vm(false).await.unwrap();

        // Once stopped, the VM is back to not-ready.
        assert!(hypervisor.stop_vm(false).await.is_err());
        assert!(hypervisor.pause_vm().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_wait_only() {
        let hypervisor = running_mock().await;
        hypervisor.stop_vm(true).await.unwrap();
        assert!(hypervisor.start_vm(10).await.is_err());
    }

    #[tokio::test]
    async fn test_hotplug_requires_running_vm() {
        let hypervisor = MockHypervisor::new();
        hypervisor
            .set_config(HypervisorConfig::default())
            .await
            .unwrap();
        hypervisor
            .create_vm("sandbox-1", NetworkHandle::default())
            .await
            .unwrap();

        let device = DeviceType::Memory(MemoryDevice {
            slot: 0,
            size_mb: 128,
            addr: 0,
            probe: false,
        });
        assert!(hypervisor.hotplug_add_device(device).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_slot_uniqueness() {
        let hypervisor = running_mock().await;

        let device = DeviceType::Memory(MemoryDevice {
            slot: 3,
            size_mb: 128,
            addr: 0,
            probe: false,
        });
        hypervisor.hotplug_add_device(device.clone()).await.unwrap();

        // Reusing a live slot is rejected.
        assert!(hypervisor.hotplug_add_device(device.clone()).await.is_err());

        // After unplug the slot is free again.
        hypervisor.hotplug_remove_device(device.clone()).await.unwrap();
        hypervisor.hotplug_add_device(device).await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_vcpus_clamped() {
        let hypervisor = running_mock().await;

        let (old_vcpus, new_vcpus) = hypervisor.resize_vcpus(2).await.unwrap();
        assert_eq!((old_vcpus, new_vcpus), (1, 2));

        // Requests above the limit are satisfied only partially.
        let (old_vcpus, new_vcpus) = hypervisor.resize_vcpus(64).await.unwrap();
        assert_eq!((old_vcpus, new_vcpus), (2, 4));

        let (_, new_vcpus) = hypervisor.resize_vcpus(0).await.unwrap();
        assert_eq!(new_vcpus, 1);
    }

    #[tokio::test]
    async fn test_resize_memory_block_aligned() {
        let hypervisor = running_mock().await;

        let (achieved, device) = hypervisor.resize_memory(3000, 128, false).await.unwrap();
        assert_eq!(achieved, 2944); // rounded down to the block size
        assert_eq!(device.size_mb, 2944 - 2048);
        assert!(!device.probe);

        // Requests above the limit are clamped.
        let (achieved, _) = hypervisor.resize_memory(1 << 20, 0, false).await.unwrap();
        assert_eq!(achieved, 4096);
    }

    #[tokio::test]
    async fn test_thread_ids_track_vcpus() {
        let hypervisor = running_mock().await;

        let thread_ids = hypervisor.get_thread_ids().await.unwrap();
        assert_eq!(thread_ids.vcpus.len(), 1);

        hypervisor.resize_vcpus(3).await.unwrap();
        let thread_ids = hypervisor.get_thread_ids().await.unwrap();
        assert_eq!(thread_ids.vcpus.len(), 3);
    }

    #[tokio::test]
    async fn test_cpu_hotplug() {
        let hypervisor = running_mock().await;

        let device = DeviceType::Cpu(CpuDevice { count: 2 });
        hypervisor.hotplug_add_device(device.clone()).await.unwrap();
        let thread_ids = hypervisor.get_thread_ids().await.unwrap();
        assert_eq!(thread_ids.vcpus.len(), 3);

        hypervisor.hotplug_remove_device(device).await.unwrap();
        let thread_ids = hypervisor.get_thread_ids().await.unwrap();
        assert_eq!(thread_ids.vcpus.len(), 1);
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let hypervisor = running_mock().await;
        let state = hypervisor.save_state().await.unwrap();
        let bytes = state.to_bytes().unwrap();

        let restored = MockHypervisor::new();
        restored
            .load_state(HypervisorState::from_bytes(&bytes).unwrap())
            .await
            .unwrap();

        // The restored VM resumes live with the same identity.
        restored.pause_vm().await.unwrap();
        let restored_state = restored.save_state().await.unwrap();
        assert_eq!(restored_state.id, "sandbox-1");
        assert_eq!(restored_state.vm_path, state.vm_path);
    }

    #[tokio::test]
    async fn test_generate_socket() {
        let hypervisor = running_mock().await;
        let socket = hypervisor.generate_socket("sandbox-1").await.unwrap();

        match socket {
            VmSocket::HybridVsock(hvsock) => {
                assert!(hvsock.uds_path.contains("sandbox-1"));
            }
            other => panic!("unexpected socket type {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capabilities() {
        let hypervisor = configured_mock().await;
        let capabilities = hypervisor.capabilities().await.unwrap();
        assert!(capabilities.is_hybrid_vsock_supported());
        assert!(capabilities.is_fs_sharing_supported());
        assert!(!hypervisor.is_rate_limiter_builtin().await);
    }
}

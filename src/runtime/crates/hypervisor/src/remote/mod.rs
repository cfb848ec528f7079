// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Delegation to a remote hypervisor service.
//!
//! The VM itself lives behind the service named by
//! `HypervisorConfig::remote_hypervisor_socket`; this driver only carries the
//! configuration and the sandbox identity across that boundary. Operations
//! that would have to reach the VM directly are reported as unsupported, and
//! host capability checking is bypassed entirely for this backend since only
//! the remote peer can answer it.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::device::{DeviceType, MemoryDevice, RemoteSock};
use crate::{
    Capabilities, Hypervisor, HypervisorConfig, HypervisorState, HypervisorType, NetworkHandle,
    VcpuThreadIds, VmSocket,
};

#[derive(Debug, Default)]
struct RemoteInner {
    config: Option<HypervisorConfig>,
    id: String,
}

impl RemoteInner {
    fn config(&self) -> Result<&HypervisorConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| anyhow!("hypervisor not configured"))
    }
}

#[derive(Debug, Default)]
pub struct RemoteHypervisor {
    inner: Arc<RwLock<RemoteInner>>,
}

impl RemoteHypervisor {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unsupported(operation: &str) -> anyhow::Error {
    anyhow!("{} is not supported on the remote hypervisor", operation)
}

#[async_trait]
impl Hypervisor for RemoteHypervisor {
    async fn set_config(&self, config: HypervisorConfig) -> Result<()> {
        config.validate_template_config()?;
        if config.remote_hypervisor_socket.is_empty() {
            return Err(anyhow!("remote hypervisor socket is not configured"));
        }

        let mut inner = self.inner.write().await;
        inner.config = Some(config);

        Ok(())
    }

    async fn hypervisor_config(&self) -> Result<HypervisorConfig> {
        let inner = self.inner.read().await;
        inner.config().cloned()
    }

    async fn create_vm(&self, id: &str, _network: NetworkHandle) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.config()?;
        if id.is_empty() {
            return Err(anyhow!("empty sandbox id"));
        }
        inner.id = id.to_owned();

        // Creation itself is carried out by the remote service over its
        // socket; nothing is spawned on this host.
        Ok(())
    }

    async fn start_vm(&self, _timeout_secs: i32) -> Result<()> {
        Err(unsupported("start_vm"))
    }

    async fn attest_vm(&self) -> Result<()> {
        Err(unsupported("attest_vm"))
    }

    async fn stop_vm(&self, _wait_only: bool) -> Result<()> {
        Err(unsupported("stop_vm"))
    }

    async fn pause_vm(&self) -> Result<()> {
        Err(unsupported("pause_vm"))
    }

    async fn resume_vm(&self) -> Result<()> {
        Err(unsupported("resume_vm"))
    }

    async fn save_vm(&self) -> Result<()> {
        Err(unsupported("save_vm"))
    }

    async fn disconnect(&self) {}

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn add_device(&self, _device: DeviceType) -> Result<()> {
        Err(unsupported("add_device"))
    }

    async fn hotplug_add_device(&self, _device: DeviceType) -> Result<DeviceType> {
        Err(unsupported("hotplug_add_device"))
    }

    async fn hotplug_remove_device(&self, _device: DeviceType) -> Result<DeviceType> {
        Err(unsupported("hotplug_remove_device"))
    }

    async fn resize_memory(
        &self,
        _new_mem_mb: u32,
        _block_size_mb: u32,
        _probe: bool,
    ) -> Result<(u32, MemoryDevice)> {
        Err(unsupported("resize_memory"))
    }

    async fn resize_vcpus(&self, _new_vcpus: u32) -> Result<(u32, u32)> {
        Err(unsupported("resize_vcpus"))
    }

    async fn get_total_memory_mb(&self) -> Result<u32> {
        Err(unsupported("get_total_memory_mb"))
    }

    async fn get_thread_ids(&self) -> Result<VcpuThreadIds> {
        // The remote peer owns the vcpu threads; there is nothing to map on
        // this host.
        Ok(VcpuThreadIds::default())
    }

    async fn get_pids(&self) -> Result<Vec<u32>> {
        Err(unsupported("get_pids"))
    }

    async fn get_virtio_fs_pid(&self) -> Option<u32> {
        None
    }

    async fn get_vm_console(&self, _id: &str) -> Result<(String, String)> {
        Err(unsupported("get_vm_console"))
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities::new())
    }

    async fn is_rate_limiter_builtin(&self) -> bool {
        false
    }

    async fn check(&self) -> Result<()> {
        // Capability checking is delegated to the remote peer.
        Ok(())
    }

    async fn save_state(&self) -> Result<HypervisorState> {
        let inner = self.inner.read().await;
        let config = inner.config()?.clone();

        Ok(HypervisorState {
            hypervisor_type: HypervisorType::Remote.to_string(),
            id: inner.id.clone(),
            config,
            ..Default::default()
        })
    }

    async fn load_state(&self, state: HypervisorState) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.config = Some(state.config);
        inner.id = state.id;

        Ok(())
    }

    async fn generate_socket(&self, id: &str) -> Result<VmSocket> {
        let inner = self.inner.read().await;
        inner.config()?;

        Ok(VmSocket::Remote(RemoteSock {
            sandbox_id: id.to_owned(),
        }))
    }
}

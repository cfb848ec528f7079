// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use warden_types::config::default;

use crate::device::{DeviceType, MemoryDevice};
use crate::utils::{get_hvsock_path, get_jailer_root, get_sandbox_path};
use crate::{
    Capabilities, CapabilityBits, HybridVsockConfig, HypervisorConfig, HypervisorState,
    NetworkHandle, VcpuThreadIds, VmSocket, VmmState,
};

#[derive(Debug)]
pub(crate) struct MockInner {
    pub(crate) config: Option<HypervisorConfig>,
    pub(crate) state: VmmState,
    pub(crate) id: String,
    pub(crate) netns: Option<String>,
    pub(crate) vm_path: String,
    pub(crate) vcpus: u32,
    pub(crate) memory_mb: u32,
    pub(crate) devices: Vec<DeviceType>,
    mem_slots: HashSet<u32>,
    next_slot: u32,
    capabilities: Capabilities,
}

impl MockInner {
    pub(crate) fn new() -> Self {
        let mut capabilities = Capabilities::new();
        capabilities.set(
            CapabilityBits::BlockDeviceSupport
                | CapabilityBits::BlockDeviceHotplugSupport
                | CapabilityBits::MultiQueueSupport
                | CapabilityBits::FsSharingSupport
                | CapabilityBits::HybridVsockSupport
                | CapabilityBits::GuestMemoryProbe,
        );

        MockInner {
            config: None,
            state: VmmState::NotReady,
            id: String::new(),
            netns: None,
            vm_path: String::new(),
            vcpus: 0,
            memory_mb: 0,
            devices: Vec::new(),
            mem_slots: HashSet::new(),
            next_slot: 0,
            capabilities,
        }
    }

    fn config(&self) -> Result<&HypervisorConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| anyhow!("hypervisor not configured"))
    }

    fn ensure_state(&self, allowed: &[VmmState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(anyhow!(
                "cannot {} while the VM is in state {:?}",
                operation,
                self.state
            ))
        }
    }

    pub(crate) fn set_config(&mut self, config: HypervisorConfig) -> Result<()> {
        config
            .validate_template_config()
            .context("validate templating configuration")?;

        let mut config = config;
        if config.num_vcpus == 0 {
            config.num_vcpus = default::DEFAULT_GUEST_VCPUS;
        }
        if config.memory_size_mb == 0 {
            config.memory_size_mb = default::DEFAULT_GUEST_MEMORY_SIZE_MB;
        }
        if config.default_bridges == 0 {
            config.default_bridges = default::DEFAULT_BRIDGES;
        }

        self.vcpus = config.num_vcpus;
        self.memory_mb = config.memory_size_mb;
        self.config = Some(config);

        Ok(())
    }

    pub(crate) fn hypervisor_config(&self) -> Result<HypervisorConfig> {
        self.config().cloned()
    }

    pub(crate) fn create_vm(&mut self, id: &str, network: NetworkHandle) -> Result<()> {
        self.config()?;
        self.ensure_state(&[VmmState::NotReady], "create the VM")?;
        if id.is_empty() {
            return Err(anyhow!("empty sandbox id"));
        }

        self.id = id.to_owned();
        self.vm_path = get_sandbox_path(id);
        self.netns = network.netns;
        self.state = VmmState::VmReady;

        info!(sl!(), "mock VM created"; "id" => id);

        Ok(())
    }

    pub(crate) fn start_vm(&mut self, timeout_secs: i32) -> Result<()> {
        self.ensure_state(&[VmmState::VmReady], "start the VM")?;
        if timeout_secs < 0 {
            return Err(anyhow!("invalid VM start timeout {}", timeout_secs));
        }

        self.state = VmmState::VmRunning;

        Ok(())
    }

    pub(crate) fn attest_vm(&self) -> Result<()> {
        self.ensure_state(&[VmmState::VmRunning], "attest the VM")
    }

    pub(crate) fn stop_vm(&mut self, wait_only: bool) -> Result<()> {
        self.ensure_state(&[VmmState::VmRunning, VmmState::VmPaused], "stop the VM")?;

        if !wait_only {
            // An actual driver would terminate the VMM process here; the
            // wait-only flavor skips that and only does the bookkeeping.
            debug!(sl!(), "mock VM terminated"; "id" => self.id.as_str());
        }

        self.state = VmmState::NotReady;

        Ok(())
    }

    pub(crate) fn pause_vm(&mut self) -> Result<()> {
        self.ensure_state(&[VmmState::VmRunning], "pause the VM")?;
        self.state = VmmState::VmPaused;

        Ok(())
    }

    pub(crate) fn resume_vm(&mut self) -> Result<()> {
        self.ensure_state(&[VmmState::VmPaused], "resume the VM")?;
        self.state = VmmState::VmRunning;

        Ok(())
    }

    pub(crate) fn save_vm(&self) -> Result<()> {
        self.ensure_state(&[VmmState::VmRunning, VmmState::VmPaused], "save the VM")
    }

    pub(crate) fn cleanup(&mut self) -> Result<()> {
        self.devices.clear();
        self.mem_slots.clear();

        Ok(())
    }

    pub(crate) fn add_device(&mut self, device: DeviceType) -> Result<()> {
        self.config()?;
        self.devices.push(device);

        Ok(())
    }

    pub(crate) fn hotplug_add_device(&mut self, device: DeviceType) -> Result<DeviceType> {
        self.ensure_state(
            &[VmmState::VmRunning, VmmState::VmPaused],
            "hotplug a device",
        )?;

        match &device {
            DeviceType::Memory(mem) => {
                if !self.mem_slots.insert(mem.slot) {
                    return Err(anyhow!("memory slot {} is already in use", mem.slot));
                }
                self.memory_mb += mem.size_mb;
                self.next_slot = self.next_slot.max(mem.slot + 1);
            }
            DeviceType::Cpu(cpu) => {
                self.vcpus += cpu.count;
            }
            _ => {}
        }

        self.devices.push(device.clone());

        Ok(device)
    }

    pub(crate) fn hotplug_remove_device(&mut self, device: DeviceType) -> Result<DeviceType> {
        self.ensure_state(
            &[VmmState::VmRunning, VmmState::VmPaused],
            "unplug a device",
        )?;

        let position = self
            .devices
            .iter()
            .position(|attached| attached == &device)
            .ok_or_else(|| anyhow!("device not attached: {}", device))?;

        match &device {
            DeviceType::Memory(mem) => {
                self.mem_slots.remove(&mem.slot);
                self.memory_mb = self.memory_mb.saturating_sub(mem.size_mb);
            }
            DeviceType::Cpu(cpu) => {
                self.vcpus = self.vcpus.saturating_sub(cpu.count).max(1);
            }
            _ => {}
        }

        self.devices.remove(position);

        Ok(device)
    }

    pub(crate) fn resize_memory(
        &mut self,
        new_mem_mb: u32,
        block_size_mb: u32,
        probe: bool,
    ) -> Result<(u32, MemoryDevice)> {
        self.ensure_state(&[VmmState::VmRunning, VmmState::VmPaused], "resize memory")?;
        let config = self.config()?;

        let mut target = new_mem_mb.max(default::MIN_HYPERVISOR_MEMORY_MB);
        if config.default_max_memory_mb > 0 {
            target = target.min(config.default_max_memory_mb as u32);
        }
        if block_size_mb > 0 {
            // Round down to the guest memory block size; the result may fall
            // short of the request.
            target -= target % block_size_mb;
        }

        let delta = if target >= self.memory_mb {
            target - self.memory_mb
        } else {
            self.memory_mb - target
        };

        let device = MemoryDevice {
            slot: self.next_slot,
            size_mb: delta,
            addr: 0,
            probe,
        };

        if delta > 0 {
            self.next_slot += 1;
        }
        self.memory_mb = target;

        Ok((target, device))
    }

    pub(crate) fn resize_vcpus(&mut self, new_vcpus: u32) -> Result<(u32, u32)> {
        self.ensure_state(&[VmmState::VmRunning, VmmState::VmPaused], "resize vcpus")?;
        let config = self.config()?;

        let old_vcpus = self.vcpus;
        let mut new_vcpus = new_vcpus.max(1);
        if config.default_max_vcpus > 0 {
            new_vcpus = new_vcpus.min(config.default_max_vcpus);
        }
        self.vcpus = new_vcpus;

        Ok((old_vcpus, new_vcpus))
    }

    pub(crate) fn get_total_memory_mb(&self) -> Result<u32> {
        self.config()?;

        Ok(self.memory_mb)
    }

    pub(crate) fn get_thread_ids(&self) -> Result<VcpuThreadIds> {
        self.ensure_state(
            &[VmmState::VmRunning, VmmState::VmPaused],
            "map vcpu threads",
        )?;

        let base_tid = std::process::id();
        let mut thread_ids = VcpuThreadIds::default();
        for vcpu in 0..self.vcpus {
            thread_ids.vcpus.insert(vcpu, base_tid + vcpu);
        }

        Ok(thread_ids)
    }

    pub(crate) fn get_pids(&self) -> Result<Vec<u32>> {
        self.config()?;

        // The mock "VMM process" is this very process; its pid sits at
        // index 0 per the contract.
        Ok(vec![std::process::id()])
    }

    pub(crate) fn get_vm_console(&self) -> Result<(String, String)> {
        self.ensure_state(
            &[VmmState::VmReady, VmmState::VmRunning, VmmState::VmPaused],
            "access the console",
        )?;

        Ok(("unix".to_owned(), format!("{}/console.sock", self.vm_path)))
    }

    pub(crate) fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.capabilities)
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.config().map(|_| ())
    }

    pub(crate) fn generate_socket(&self, id: &str) -> Result<VmSocket> {
        self.config()?;

        Ok(VmSocket::HybridVsock(HybridVsockConfig {
            uds_path: get_hvsock_path(id),
            port: default::DEFAULT_VSOCK_PORT,
        }))
    }

    pub(crate) fn save_state(&self) -> Result<HypervisorState> {
        let config = self.config()?.clone();

        Ok(HypervisorState {
            hypervisor_type: crate::HypervisorType::Mock.to_string(),
            id: self.id.clone(),
            vm_path: self.vm_path.clone(),
            jailed: false,
            jailer_root: get_jailer_root(&self.id),
            netns: self.netns.clone(),
            pids: vec![std::process::id()],
            virtiofs_pid: None,
            config,
        })
    }

    pub(crate) fn load_state(&mut self, state: HypervisorState) -> Result<()> {
        self.vcpus = state.config.num_vcpus;
        self.memory_mb = state.config.memory_size_mb;
        self.config = Some(state.config);
        self.id = state.id;
        self.vm_path = state.vm_path;
        self.netns = state.netns;
        // A restored sandbox resumes with its VM considered live.
        self.state = VmmState::VmRunning;

        Ok(())
    }
}

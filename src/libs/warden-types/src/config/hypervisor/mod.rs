// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Configuration information for hypervisors.
//!
//! A single `HypervisorConfig` carries the full tunable state for one VM
//! instance: guest asset paths, resource limits, rate limiters,
//! confidential-computing and templating flags. The orchestration layer owns
//! the config and hands it by reference to exactly one backend driver for the
//! VM's lifetime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slog::debug;
use thiserror::Error;

use crate::asset::{Asset, AssetType};
use crate::sl;

/// A key/value pair for hypervisor and kernel command line parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Param {
    /// Parameter name, may be empty for value-only parameters.
    pub key: String,
    /// Parameter value, may be empty for bare flags.
    pub value: String,
}

impl Param {
    /// Create a new key/value parameter.
    pub fn new(key: &str, value: &str) -> Self {
        Param {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

/// Structured configuration validation error.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// Both templating modes requested at once.
    #[error("cannot set both 'boot to be template' and 'boot from template'")]
    AmbiguousTemplating,

    /// Templating requested without a memory snapshot path.
    #[error("missing memory snapshot path for VM templating")]
    MissingMemoryPath,

    /// Boot from template requested without a device state path.
    #[error("missing device state path to boot from VM template")]
    MissingDevicesStatePath,

    /// Kernel or hypervisor parameter with an empty key.
    #[error("empty parameter key")]
    EmptyParamKey,

    /// Custom asset failed its validity check.
    #[error("invalid {asset_type} asset at {path}")]
    InvalidAsset {
        /// Type of the offending asset.
        asset_type: AssetType,
        /// Host path that failed validation.
        path: String,
    },
}

/// The hypervisor configuration: full tunable state for one VM instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HypervisorConfig {
    /// Custom assets, overriding the configured default paths.
    #[serde(default)]
    custom_assets: HashMap<AssetType, Asset>,

    /// Path to the guest kernel image.
    #[serde(default)]
    pub kernel_path: String,

    /// Path to the guest rootfs image.
    #[serde(default)]
    pub image_path: String,

    /// Path to the guest initrd.
    #[serde(default)]
    pub initrd_path: String,

    /// Path to the guest firmware.
    #[serde(default)]
    pub firmware_path: String,

    /// Path to the guest firmware volume.
    #[serde(default)]
    pub firmware_volume_path: String,

    /// Path to the hypervisor binary.
    #[serde(default)]
    pub hypervisor_path: String,

    /// Path to the hypervisor control binary.
    #[serde(default)]
    pub hypervisor_ctl_path: String,

    /// Path to the jailer binary.
    #[serde(default)]
    pub jailer_path: String,

    /// Path to the memory snapshot used by VM templating.
    #[serde(default)]
    pub memory_path: String,

    /// Path to the device state snapshot used when booting from a template.
    #[serde(default)]
    pub devices_state_path: String,

    /// Entropy source passed to the VM, e.g. /dev/urandom.
    #[serde(default)]
    pub entropy_source: String,

    /// Base directory for per-VM persistent state.
    #[serde(default)]
    pub vm_store_path: String,

    /// Base directory for per-VM runtime state.
    #[serde(default)]
    pub run_store_path: String,

    /// Hypervisor machine type, for hypervisors that model machines.
    #[serde(default)]
    pub machine_type: String,

    /// Machine accelerators, comma-separated.
    #[serde(default)]
    pub machine_accelerators: String,

    /// CPU features passed to the vCPU model, comma-separated.
    #[serde(default)]
    pub cpu_features: String,

    /// Block storage driver used for guest disks.
    #[serde(default)]
    pub block_device_driver: String,

    /// Unix socket of the remote hypervisor service, for the remote backend.
    #[serde(default)]
    pub remote_hypervisor_socket: String,

    /// Timeout for remote hypervisor calls, in seconds.
    #[serde(default)]
    pub remote_hypervisor_timeout: u32,

    /// Guest kernel parameters.
    #[serde(default)]
    pub kernel_params: Vec<Param>,

    /// Extra hypervisor command line parameters.
    #[serde(default)]
    pub hypervisor_params: Vec<Param>,

    /// Number of vCPUs the VM boots with.
    #[serde(default)]
    pub num_vcpus: u32,

    /// Upper bound for vCPU hotplug.
    #[serde(default)]
    pub default_max_vcpus: u32,

    /// Guest memory size the VM boots with, in MiB.
    #[serde(default)]
    pub memory_size_mb: u32,

    /// Upper bound for memory hotplug, in MiB.
    #[serde(default)]
    pub default_max_memory_mb: u64,

    /// Number of memory slots reserved for memory hotplug.
    #[serde(default)]
    pub mem_slots: u32,

    /// Memory space reserved after the end of guest RAM, in MiB.
    #[serde(default)]
    pub mem_offset: u64,

    /// Number of PCI bridges created at boot.
    #[serde(default)]
    pub default_bridges: u32,

    /// Disk I/O bandwidth cap, in bits/sec.
    #[serde(default)]
    pub disk_rate_limiter_bw_max_rate: i64,

    /// One-time burst allowed on top of the disk bandwidth cap.
    #[serde(default)]
    pub disk_rate_limiter_bw_one_time_burst: i64,

    /// Disk I/O operations cap, in ops/sec.
    #[serde(default)]
    pub disk_rate_limiter_ops_max_rate: i64,

    /// One-time burst allowed on top of the disk operations cap.
    #[serde(default)]
    pub disk_rate_limiter_ops_one_time_burst: i64,

    /// Network bandwidth cap, in bits/sec.
    #[serde(default)]
    pub net_rate_limiter_bw_max_rate: i64,

    /// One-time burst allowed on top of the network bandwidth cap.
    #[serde(default)]
    pub net_rate_limiter_bw_one_time_burst: i64,

    /// Network operations cap, in ops/sec.
    #[serde(default)]
    pub net_rate_limiter_ops_max_rate: i64,

    /// One-time burst allowed on top of the network operations cap.
    #[serde(default)]
    pub net_rate_limiter_ops_one_time_burst: i64,

    /// Transmit rate cap for backends with a built-in limiter, in bits/sec.
    #[serde(default)]
    pub tx_rate_limiter_max_rate: u64,

    /// Receive rate cap for backends with a built-in limiter, in bits/sec.
    #[serde(default)]
    pub rx_rate_limiter_max_rate: u64,

    /// Run the VM as a confidential guest.
    #[serde(default)]
    pub confidential_guest: bool,

    /// Use AMD SEV-SNP for the confidential guest.
    #[serde(default)]
    pub sev_snp_guest: bool,

    /// Boot this VM so its state can be snapshotted as a template.
    #[serde(default)]
    pub boot_to_be_template: bool,

    /// Boot this VM from a previously snapshotted template.
    #[serde(default)]
    pub boot_from_template: bool,

    /// Skip the checks that relax requirements when running nested.
    #[serde(default)]
    pub disable_nesting_checks: bool,

    /// Use I/O threads for disk I/O.
    #[serde(default)]
    pub enable_iothreads: bool,

    /// Back guest memory with huge pages.
    #[serde(default)]
    pub hugepages: bool,

    /// Preallocate guest memory at boot.
    #[serde(default)]
    pub mem_prealloc: bool,

    /// Use virtio-mem for memory resizing.
    #[serde(default)]
    pub virtio_mem: bool,

    /// Do not use the vhost-net kernel accelerator.
    #[serde(default)]
    pub disable_vhost_net: bool,

    /// Enable debug output from the hypervisor and guest kernel.
    #[serde(default)]
    pub debug: bool,
}

impl HypervisorConfig {
    /// Validate the VM templating flags.
    ///
    /// Creating a template and booting from one are mutually exclusive, and
    /// either mode needs a memory snapshot path; booting from a template
    /// additionally needs the device state snapshot.
    pub fn validate_template_config(&self) -> Result<(), ConfigError> {
        if self.boot_to_be_template && self.boot_from_template {
            return Err(ConfigError::AmbiguousTemplating);
        }

        if self.boot_to_be_template || self.boot_from_template {
            if self.memory_path.is_empty() {
                return Err(ConfigError::MissingMemoryPath);
            }

            if self.boot_from_template && self.devices_state_path.is_empty() {
                return Err(ConfigError::MissingDevicesStatePath);
            }
        }

        Ok(())
    }

    /// Append a guest kernel parameter.
    pub fn add_kernel_param(&mut self, p: Param) -> Result<(), ConfigError> {
        if p.key.is_empty() {
            return Err(ConfigError::EmptyParamKey);
        }
        self.kernel_params.push(p);

        Ok(())
    }

    /// Append a hypervisor command line parameter.
    pub fn add_hypervisor_param(&mut self, p: Param) -> Result<(), ConfigError> {
        if p.key.is_empty() {
            return Err(ConfigError::EmptyParamKey);
        }
        self.hypervisor_params.push(p);

        Ok(())
    }

    /// Record a custom asset, overriding the configured default path for its
    /// type. A later asset of the same type replaces an earlier one.
    pub fn add_custom_asset(&mut self, asset: &Asset) -> Result<(), ConfigError> {
        if asset.path().is_empty() {
            // No custom asset, the default one will be used.
            return Ok(());
        }

        if !asset.valid() {
            return Err(ConfigError::InvalidAsset {
                asset_type: asset.asset_type(),
                path: asset.path().to_owned(),
            });
        }

        debug!(sl!(), "using custom {} asset {}", asset.asset_type(), asset.path());

        self.custom_assets.insert(asset.asset_type(), asset.clone());

        Ok(())
    }

    /// Resolve the path for an asset type: the custom asset if one is
    /// recorded, the configured default otherwise.
    pub fn asset_path(&self, asset_type: AssetType) -> String {
        if let Some(asset) = self.custom_assets.get(&asset_type) {
            return asset.path().to_owned();
        }

        match asset_type {
            AssetType::Kernel => self.kernel_path.clone(),
            AssetType::Image => self.image_path.clone(),
            AssetType::Initrd => self.initrd_path.clone(),
            AssetType::Hypervisor => self.hypervisor_path.clone(),
            AssetType::HypervisorCtl => self.hypervisor_ctl_path.clone(),
            AssetType::Jailer => self.jailer_path.clone(),
            AssetType::Firmware => self.firmware_path.clone(),
            AssetType::FirmwareVolume => self.firmware_volume_path.clone(),
        }
    }

    /// Whether a custom asset is recorded for `asset_type`.
    pub fn is_custom_asset(&self, asset_type: AssetType) -> bool {
        self.custom_assets.contains_key(&asset_type)
    }

    /// Resolved guest kernel path.
    pub fn kernel_asset_path(&self) -> String {
        self.asset_path(AssetType::Kernel)
    }

    /// True if the guest kernel is a custom asset.
    pub fn custom_kernel_asset(&self) -> bool {
        self.is_custom_asset(AssetType::Kernel)
    }

    /// Resolved guest image path.
    pub fn image_asset_path(&self) -> String {
        self.asset_path(AssetType::Image)
    }

    /// True if the guest image is a custom asset.
    pub fn custom_image_asset(&self) -> bool {
        self.is_custom_asset(AssetType::Image)
    }

    /// Resolved guest initrd path.
    pub fn initrd_asset_path(&self) -> String {
        self.asset_path(AssetType::Initrd)
    }

    /// True if the guest initrd is a custom asset.
    pub fn custom_initrd_asset(&self) -> bool {
        self.is_custom_asset(AssetType::Initrd)
    }

    /// Resolved hypervisor binary path.
    pub fn hypervisor_asset_path(&self) -> String {
        self.asset_path(AssetType::Hypervisor)
    }

    /// True if the hypervisor binary is a custom asset.
    pub fn custom_hypervisor_asset(&self) -> bool {
        self.is_custom_asset(AssetType::Hypervisor)
    }

    /// Resolved hypervisor control binary path.
    pub fn hypervisor_ctl_asset_path(&self) -> String {
        self.asset_path(AssetType::HypervisorCtl)
    }

    /// True if the hypervisor control binary is a custom asset.
    pub fn custom_hypervisor_ctl_asset(&self) -> bool {
        self.is_custom_asset(AssetType::HypervisorCtl)
    }

    /// Resolved guest firmware path.
    pub fn firmware_asset_path(&self) -> String {
        self.asset_path(AssetType::Firmware)
    }

    /// True if the guest firmware is a custom asset.
    pub fn custom_firmware_asset(&self) -> bool {
        self.is_custom_asset(AssetType::Firmware)
    }

    /// Resolved guest firmware volume path.
    pub fn firmware_volume_asset_path(&self) -> String {
        self.asset_path(AssetType::FirmwareVolume)
    }

    /// True if the guest firmware volume is a custom asset.
    pub fn custom_firmware_volume_asset(&self) -> bool {
        self.is_custom_asset(AssetType::FirmwareVolume)
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Type of a guest asset.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, Hash, PartialEq)]
pub enum AssetType {
    /// Guest kernel image.
    Kernel,
    /// Guest rootfs image.
    Image,
    /// Guest initrd image.
    Initrd,
    /// Hypervisor binary.
    Hypervisor,
    /// Hypervisor control binary.
    HypervisorCtl,
    /// Jailer binary.
    Jailer,
    /// Guest firmware image.
    Firmware,
    /// Guest firmware volume.
    FirmwareVolume,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetType::Kernel => "kernel",
            AssetType::Image => "image",
            AssetType::Initrd => "initrd",
            AssetType::Hypervisor => "hypervisor",
            AssetType::HypervisorCtl => "hypervisor-ctl",
            AssetType::Jailer => "jailer",
            AssetType::Firmware => "firmware",
            AssetType::FirmwareVolume => "firmware-volume",
        };
        write!(f, "{}", name)
    }
}

/// A guest asset with its type and the host path backing it.
///
/// Custom assets take precedence over the paths configured in
/// `HypervisorConfig`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Asset {
    asset_type: AssetType,
    path: String,
}

impl Asset {
    /// Create a new asset of `asset_type` backed by `path`.
    pub fn new(asset_type: AssetType, path: &str) -> Self {
        Asset {
            asset_type,
            path: path.to_owned(),
        }
    }

    /// Type of the asset.
    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// Host path backing the asset.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// An asset is valid if its path is absolute and exists on the host.
    pub fn valid(&self) -> bool {
        let path = Path::new(&self.path);
        path.is_absolute() && path.exists()
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Driver registry mapping a [`HypervisorType`] to its constructor.
//!
//! The mock and remote drivers are built in; concrete VMM drivers live in
//! their own crates and register themselves at startup, which keeps the type
//! dispatch in one place instead of a branch per call site.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;

use crate::mock::MockHypervisor;
use crate::remote::RemoteHypervisor;
use crate::{Hypervisor, HypervisorConfig, HypervisorType, VmSocket};

/// Constructor for a registered hypervisor driver.
pub type HypervisorCtor = fn() -> Arc<dyn Hypervisor>;

lazy_static! {
    static ref HYPERVISOR_DRIVERS: Mutex<HashMap<HypervisorType, HypervisorCtor>> =
        Mutex::new(HashMap::new());
}

/// Register a driver constructor for `hypervisor_type`, replacing any
/// earlier registration.
pub fn register_hypervisor_driver(hypervisor_type: HypervisorType, ctor: HypervisorCtor) {
    let mut drivers = HYPERVISOR_DRIVERS.lock().unwrap();
    drivers.insert(hypervisor_type, ctor);
}

/// Instantiate an unconfigured driver for `hypervisor_type`.
pub fn new_hypervisor(hypervisor_type: &HypervisorType) -> Result<Arc<dyn Hypervisor>> {
    match hypervisor_type {
        HypervisorType::Mock => Ok(Arc::new(MockHypervisor::new())),
        HypervisorType::Remote => Ok(Arc::new(RemoteHypervisor::new())),
        hypervisor_type => {
            let drivers = HYPERVISOR_DRIVERS.lock().unwrap();
            drivers
                .get(hypervisor_type)
                .map(|ctor| ctor())
                .ok_or_else(|| {
                    anyhow!(
                        "no hypervisor driver registered for type {}",
                        hypervisor_type
                    )
                })
        }
    }
}

// Tag that is used to represent the name of a sandbox
const TEMPLATE_SANDBOX_ID: &str = "{ID}";

/// Returns the full "template" path to the hypervisor socket, with the
/// placeholder `{ID}` standing in for the sandbox name until sandbox creation
/// time. Backends whose socket is not backed by a host unix socket yield an
/// empty string.
pub async fn get_hypervisor_socket_template(
    hypervisor_type: &HypervisorType,
    config: &HypervisorConfig,
) -> Result<String> {
    let hypervisor = new_hypervisor(hypervisor_type)?;
    hypervisor.set_config(config.clone()).await?;

    let socket = hypervisor.generate_socket(TEMPLATE_SANDBOX_ID).await?;

    let socket_path = match socket {
        VmSocket::HybridVsock(hvsock) => hvsock.uds_path,
        _ => String::new(),
    };

    Ok(socket_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hypervisor_builtin() {
        assert!(new_hypervisor(&HypervisorType::Mock).is_ok());
        assert!(new_hypervisor(&HypervisorType::Remote).is_ok());
        assert!(new_hypervisor(&HypervisorType::Qemu).is_err());
    }

    #[test]
    fn test_register_driver() {
        assert!(new_hypervisor(&HypervisorType::Dragonball).is_err());

        register_hypervisor_driver(HypervisorType::Dragonball, || {
            Arc::new(MockHypervisor::new())
        });
        assert!(new_hypervisor(&HypervisorType::Dragonball).is_ok());
    }

    #[tokio::test]
    async fn test_socket_template_hybrid_vsock() {
        let template =
            get_hypervisor_socket_template(&HypervisorType::Mock, &HypervisorConfig::default())
                .await
                .unwrap();
        assert!(template.contains("{ID}"));
    }

    #[tokio::test]
    async fn test_socket_template_without_vsock() {
        let mut config = HypervisorConfig::default();
        config.remote_hypervisor_socket = "/run/peer/hypervisor.sock".to_string();
        let template = get_hypervisor_socket_template(&HypervisorType::Remote, &config)
            .await
            .unwrap();
        assert_eq!(template, "");
    }
}

// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use warden_types::config::WARDEN_PATH;

use crate::{DEFAULT_HYBRID_VSOCK_NAME, JAILER_ROOT};

// Return the path for a _hypothetical_ sandbox: the path does *not*
// necessarily exist yet.
pub fn get_sandbox_path(sid: &str) -> String {
    [WARDEN_PATH, sid].join("/")
}

pub fn get_jailer_root(sid: &str) -> String {
    let sandbox_path = get_sandbox_path(sid);

    [&sandbox_path, JAILER_ROOT].join("/")
}

pub fn get_hvsock_path(sid: &str) -> String {
    let jailer_root_path = get_jailer_root(sid);

    [jailer_root_path, DEFAULT_HYBRID_VSOCK_NAME.to_owned()].join("/")
}

pub fn bytes_to_megs(bytes: u64) -> u32 {
    (bytes / (1 << 20)) as u32
}

pub fn megs_to_bytes(megs: u32) -> u64 {
    megs as u64 * (1 << 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_paths() {
        assert_eq!(get_sandbox_path("sb"), "/run/warden/sb");
        assert_eq!(get_jailer_root("sb"), "/run/warden/sb/root");
        assert_eq!(get_hvsock_path("sb"), "/run/warden/sb/root/warden.hvsock");
    }

    #[test]
    fn test_megs_conversion() {
        assert_eq!(bytes_to_megs(0), 0);
        assert_eq!(bytes_to_megs(1 << 20), 1);
        assert_eq!(megs_to_bytes(2048), 2048 * 1024 * 1024);
    }
}

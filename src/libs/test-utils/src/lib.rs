// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Test helper macros shared by Warden crates.

/// Skip the current test when running as the root user.
#[macro_export]
macro_rules! skip_if_root {
    () => {
        if nix::unistd::Uid::effective().is_root() {
            println!("INFO: skipping {} which needs non-root", module_path!());
            return;
        }
    };
}

/// Skip the current test unless running as the root user.
#[macro_export]
macro_rules! skip_if_not_root {
    () => {
        if !nix::unistd::Uid::effective().is_root() {
            println!("INFO: skipping {} which needs root", module_path!());
            return;
        }
    };
}

/// Skip the current test when `path` does not exist on the host.
#[macro_export]
macro_rules! skip_if_path_missing {
    ($path:expr) => {
        if !std::path::Path::new($path).exists() {
            println!("INFO: skipping {}, {} not present", module_path!(), $path);
            return;
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_skip_if_not_root() {
        skip_if_not_root!();
        assert!(
            nix::unistd::Uid::effective().is_root(),
            "normal user should be skipped"
        )
    }

    #[test]
    fn test_skip_if_root() {
        skip_if_root!();
        assert!(
            !nix::unistd::Uid::effective().is_root(),
            "root user should be skipped"
        )
    }
}

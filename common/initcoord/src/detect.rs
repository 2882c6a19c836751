// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// The closed set of init systems the coordinator knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InitSystem {
    Systemd,
    Openrc,
    Runit,
    S6,
    Upstart,
    Sysvinit,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct InitInfo {
    pub system: InitSystem,
    /// PID 1's comm, for diagnostics and the sysvinit fallback probe.
    pub pid1_comm: String,
    /// The systemd version, when the init system is systemd and asking it
    /// succeeded.
    pub version: Option<String>,
}

/// Runs the detection probes against a filesystem root. The probe order is
/// deliberate: marker directories beat the generic PID 1 comm check, and
/// systemd leaves `/run/systemd/system` around even where `init` is a
/// compatibility symlink to it.
pub(crate) fn detect_at(root: &Path, pid1_comm: &str) -> InitSystem {
    if root.join("run/systemd/system").exists() {
        InitSystem::Systemd
    } else if root.join("run/openrc").exists() || root.join("sbin/openrc-run").exists() {
        InitSystem::Openrc
    } else if root.join("run/runit.stopit").exists() || root.join("var/run/runsvdir").exists() {
        InitSystem::Runit
    } else if root.join("run/s6").exists() || root.join("run/s6-rc").exists() {
        InitSystem::S6
    } else if root.join("var/run/upstart").exists() {
        InitSystem::Upstart
    } else if pid1_comm == "init" {
        InitSystem::Sysvinit
    } else {
        InitSystem::Unknown
    }
}

/// Detects the init system running this machine.
pub fn detect() -> InitInfo {
    let pid1_comm = processes::read_process(1)
        .map(|p| p.comm)
        .unwrap_or_default();
    let system = detect_at(Path::new("/"), &pid1_comm);
    let version = match system {
        InitSystem::Systemd => systemd_version(),
        _ => None,
    };
    debug!(
        "Detected init system: {} (pid1={:?}, version={:?})",
        system, pid1_comm, version
    );
    InitInfo {
        system,
        pid1_comm,
        version,
    }
}

fn systemd_version() -> Option<String> {
    let output = processes::check_output(Command::new("systemctl").arg("--version")).ok()?;
    parse_systemctl_version(&output)
}

/// The first line of `systemctl --version` looks like
/// `systemd 252 (252.22-1~deb12u1)`; the second word is the version.
pub(crate) fn parse_systemctl_version(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

/// Substrings in `/proc/1/cgroup` that give away a container runtime.
const CONTAINER_CGROUP_MARKERS: &[&str] = &["docker", "lxc", "kubepods", "containerd"];

pub(crate) fn cgroup_indicates_container(cgroup: &str) -> bool {
    CONTAINER_CGROUP_MARKERS
        .iter()
        .any(|marker| cgroup.contains(marker))
}

/// Returns true when this process is running inside a container, where
/// driving the host's init system would be meaningless (or harmful).
pub fn running_in_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    match std::fs::read_to_string("/proc/1/cgroup") {
        Ok(cgroup) => cgroup_indicates_container(&cgroup),
        Err(_) => false,
    }
}

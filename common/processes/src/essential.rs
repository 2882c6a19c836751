// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::scan::ProcessInfo;

/// Why a process must not be terminated before the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssentialCategory {
    Kernel,
    Init,
    SelfProcess,
    Device,
    Logging,
    Network,
    Storage,
    Other,
}

/// Processes matched by name, by exact comm or prefix. Killing any of these
/// before the pivot leaves the host without devices, logs, networking, or
/// storage while the pipeline still depends on them.
const ESSENTIAL_NAMES: &[(&str, EssentialCategory)] = &[
    // Kernel housekeeping threads (normally caught by the kernel-thread
    // predicate already; listed for the rare unbracketed comm).
    ("kthreadd", EssentialCategory::Kernel),
    ("ksoftirqd", EssentialCategory::Kernel),
    ("kworker", EssentialCategory::Kernel),
    ("migration", EssentialCategory::Kernel),
    ("watchdog", EssentialCategory::Kernel),
    ("kcompactd", EssentialCategory::Kernel),
    ("khugepaged", EssentialCategory::Kernel),
    ("kswapd", EssentialCategory::Kernel),
    ("kblockd", EssentialCategory::Kernel),
    // Init systems and supervisors.
    ("systemd", EssentialCategory::Init),
    ("init", EssentialCategory::Init),
    ("openrc", EssentialCategory::Init),
    ("runit", EssentialCategory::Init),
    ("s6-svscan", EssentialCategory::Init),
    // Device management.
    ("udevd", EssentialCategory::Device),
    ("systemd-udevd", EssentialCategory::Device),
    ("eudev", EssentialCategory::Device),
    ("mdev", EssentialCategory::Device),
    // Logging.
    ("journald", EssentialCategory::Logging),
    ("systemd-journald", EssentialCategory::Logging),
    ("rsyslogd", EssentialCategory::Logging),
    ("syslog-ng", EssentialCategory::Logging),
    // Networking.
    ("dhclient", EssentialCategory::Network),
    ("dhcpcd", EssentialCategory::Network),
    ("NetworkManager", EssentialCategory::Network),
    ("wpa_supplicant", EssentialCategory::Network),
    // Storage.
    ("lvmetad", EssentialCategory::Storage),
    ("multipathd", EssentialCategory::Storage),
    ("iscsid", EssentialCategory::Storage),
];

/// Looks `comm` up in the name table, matching exactly or by prefix, so
/// instance suffixes like `kworker/3:2` or `dhclient-eth0` still match.
pub fn essential_name_category(comm: &str) -> Option<EssentialCategory> {
    ESSENTIAL_NAMES
        .iter()
        .find(|(name, _)| comm == *name || comm.starts_with(name))
        .map(|(_, category)| *category)
}

pub fn is_essential_name(comm: &str) -> bool {
    essential_name_category(comm).is_some()
}

/// Classifies a process. Anything not [`EssentialCategory::Other`] must
/// survive the termination sweep.
pub fn classify(process: &ProcessInfo) -> EssentialCategory {
    if process.is_init() {
        return EssentialCategory::Init;
    }
    if process.is_self() {
        return EssentialCategory::SelfProcess;
    }
    if process.is_kernel_thread() {
        return EssentialCategory::Kernel;
    }
    essential_name_category(&process.comm).unwrap_or(EssentialCategory::Other)
}

pub fn is_essential(process: &ProcessInfo) -> bool {
    classify(process) != EssentialCategory::Other
}

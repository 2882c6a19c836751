// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Thin typed wrappers around the Linux syscalls the pivot pipeline depends
//! on. Every wrapper reports failures as a [`SysError`] carrying the syscall
//! name, the raw errno, and an [`ErrorKind`] from a fixed set, so callers can
//! match on the failure class without consulting errno tables.

use std::path::Path;

use nix::errno::Errno;

pub use nix::mount::{MntFlags, MsFlags};
pub use nix::sched::CloneFlags;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;

/// The failure classes surfaced by the wrappers in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    InvalidArgument,
    OutOfMemory,
    DeviceBusy,
    NotADirectory,
    IsADirectory,
    NoSuchFileOrDirectory,
    NotEmpty,
    ReadOnlyFilesystem,
    TooManySymlinks,
    NameTooLong,
    NoSpace,
    Unexpected,
}

impl ErrorKind {
    pub fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => ErrorKind::PermissionDenied,
            Errno::EINVAL => ErrorKind::InvalidArgument,
            Errno::ENOMEM => ErrorKind::OutOfMemory,
            Errno::EBUSY => ErrorKind::DeviceBusy,
            Errno::ENOTDIR => ErrorKind::NotADirectory,
            Errno::EISDIR => ErrorKind::IsADirectory,
            Errno::ENOENT => ErrorKind::NoSuchFileOrDirectory,
            Errno::ENOTEMPTY => ErrorKind::NotEmpty,
            Errno::EROFS => ErrorKind::ReadOnlyFilesystem,
            Errno::ELOOP => ErrorKind::TooManySymlinks,
            Errno::ENAMETOOLONG => ErrorKind::NameTooLong,
            Errno::ENOSPC => ErrorKind::NoSpace,
            _ => ErrorKind::Unexpected,
        }
    }
}

/// A failed syscall, with enough context to print a useful diagnostic.
#[derive(Debug, thiserror::Error)]
#[error("{call} failed: {kind:?} ({errno})")]
pub struct SysError {
    pub call: &'static str,
    pub kind: ErrorKind,
    pub errno: Errno,
}

impl SysError {
    fn new(call: &'static str, errno: Errno) -> Self {
        Self {
            call,
            kind: ErrorKind::from_errno(errno),
            errno,
        }
    }
}

pub type Result<T> = std::result::Result<T, SysError>;

fn map<T>(call: &'static str, result: nix::Result<T>) -> Result<T> {
    result.map_err(|errno| SysError::new(call, errno))
}

pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    map("mount", nix::mount::mount(source, target, fstype, flags, data))
}

pub fn umount2(target: &Path, flags: MntFlags) -> Result<()> {
    map("umount2", nix::mount::umount2(target, flags))
}

pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    map("pivot_root", nix::unistd::pivot_root(new_root, put_old))
}

pub fn chroot(path: &Path) -> Result<()> {
    map("chroot", nix::unistd::chroot(path))
}

pub fn chdir(path: &Path) -> Result<()> {
    map("chdir", nix::unistd::chdir(path))
}

pub fn unshare(flags: CloneFlags) -> Result<()> {
    map("unshare", nix::sched::unshare(flags))
}

pub fn kill(pid: i32, signal: Signal) -> Result<()> {
    map("kill", nix::sys::signal::kill(Pid::from_raw(pid), signal))
}

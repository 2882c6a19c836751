// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mount primitives layered on top of the raw syscall wrappers: bind and
//! move mounts, tmpfs, propagation changes, and a parsed snapshot of
//! `/proc/mounts`.

mod ops;
mod overlay;
mod table;

pub use ops::*;
pub use overlay::*;
pub use table::*;

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Materializes a root filesystem from an OCI image reference, a local OCI
//! layout, or a tarball, and validates that the result can actually be
//! pivoted into.

mod build;
mod extract;
mod memory;
mod verify;

pub use build::*;
pub use extract::*;
pub use memory::*;
pub use verify::*;

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The process side of the pivot: a `/proc` scanner, the essential-process
//! classifier, the SIGTERM/SIGKILL terminator, and helpers for running
//! vendor subprocesses.

mod essential;
mod run;
mod scan;
mod terminate;

pub use essential::*;
pub use run::*;
pub use scan::*;
pub use terminate::*;

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cliutil::{handle_top_level_result, log_current_command_line, LoggingConfig};

mod pipeline;

use crate::pipeline::{run_pivot, PivotArgs};

#[derive(Parser, Debug)]
#[command(
    name = "xenomorph",
    version,
    about = "Replaces the running root filesystem with one built from an OCI image"
)]
struct Cli {
    /// Log at debug level.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Builds a root filesystem from IMAGE and pivots the running system
    /// onto it.
    Pivot(PivotArgs),
    /// Prints the version.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("xenomorph {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let result = LoggingConfig {
        verbose: cli.verbose,
    }
    .setup();
    if let Err(e) = result {
        eprintln!("FATAL: {:?}", e);
        return ExitCode::FAILURE;
    }
    log_current_command_line();

    let result = match cli.command {
        Commands::Pivot(args) => run_pivot(&args),
        Commands::Version => unreachable!(),
    };
    handle_top_level_result(result)
}

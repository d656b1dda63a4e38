/*
Copyright 2021 - 2022 Jakub Lewandowski

This file is part of benchcab.

benchcab is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

benchcab is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with benchcab. If not, see https://www.gnu.org/licenses/.
*/

//! benchcab is a tool for benchmarking the CABLE land surface model
//! on the Gadi supercomputer.
//!
//! It checks out and builds several versions (realisations) of CABLE,
//! runs each of them for every combination of met forcing and science
//! configuration, and compares the outputs of different realisations
//! bitwise.
//!
//! Configuration is read from `config.yaml` in the working directory
//! (or the file given with `--config`), and all files created by
//! benchcab are placed in the working directory.

mod benchmark;
mod cli;
mod constants;
mod errors;
mod utils;

use clap::Parser;
use cli::Cli;
use env_logger::Env;
use log::{error, info};

/// The main program function.
/// Prepares the runtime environment and calls the [`benchmark::main`].
///
/// To provide meaningful error messages the `env_logger`
/// needs to be initiated before any log messages are possible to occur.
fn main() {
    let cli = Cli::parse();

    let level = if cfg!(feature = "debug") || cli.command.common().verbose {
        "debug"
    } else {
        "info"
    };

    let logger_env = Env::new().filter_or("BENCHCAB_LOG_LEVEL", level);

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    match benchmark::main(cli) {
        Ok(_) => info!("benchcab execution finished."),
        Err(err) => {
            error!("benchcab execution failed with error: {}", err);
            std::process::exit(1);
        }
    }
}

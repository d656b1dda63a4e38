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

//! Command line interface of benchcab.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// benchcab is a tool for evaluation of the CABLE land surface model.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Arguments common to all subcommands.
#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Config filename.
    #[arg(short, long = "config", default_value = "config.yaml")]
    pub config_path: PathBuf,

    /// Enable more detailed output in the command line.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Optional steps of composite subcommands.
#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum SkipStep {
    FluxsiteBitwiseCmp,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum CleanOption {
    All,
    Realisations,
    Submissions,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run all test suites for CABLE.
    ///
    /// Runs the fluxsite and spatial test suites. This command runs
    /// the full default set of tests for CABLE.
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Subcommand to skip in the workflow.
        #[arg(long, value_enum)]
        skip: Vec<SkipStep>,
    },

    /// Validates a benchcab configuration file.
    #[command(name = "validate_config")]
    ValidateConfig {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the fluxsite test suite for CABLE.
    ///
    /// Equivalent of running 'benchcab checkout', 'benchcab build',
    /// 'benchcab fluxsite-setup-work-dir' and 'benchcab fluxsite-submit-job'
    /// sequentially.
    Fluxsite {
        #[command(flatten)]
        common: CommonArgs,

        /// Force benchcab to execute tasks on the current compute node.
        #[arg(long)]
        no_submit: bool,

        /// Subcommand to skip in the workflow.
        #[arg(long, value_enum)]
        skip: Vec<SkipStep>,
    },

    /// Run the checkout step in the benchmarking workflow.
    Checkout {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the build step in the benchmarking workflow.
    Build {
        #[command(flatten)]
        common: CommonArgs,

        /// Enable MPI build.
        #[arg(long)]
        mpi: bool,
    },

    /// Run the work directory setup step of the fluxsite command.
    FluxsiteSetupWorkDir {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Generate and submit the PBS job script for the fluxsite test suite.
    FluxsiteSubmitJob {
        #[command(flatten)]
        common: CommonArgs,

        /// Subcommand to skip in the workflow.
        #[arg(long, value_enum)]
        skip: Vec<SkipStep>,
    },

    /// Run the fluxsite tasks of the main fluxsite command.
    ///
    /// This command should ideally be run inside a PBS job.
    FluxsiteRunTasks {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the bitwise comparison step of the main fluxsite command.
    ///
    /// Comparisons are made with `nccmp -df` between outputs that differ
    /// in their realisation and match in all other configurations.
    FluxsiteBitwiseCmp {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the spatial tests only.
    Spatial {
        #[command(flatten)]
        common: CommonArgs,

        /// Subcommand to skip in the workflow.
        #[arg(long, value_enum)]
        skip: Vec<SkipStep>,
    },

    /// Run the work directory setup step of the spatial command.
    SpatialSetupWorkDir {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the spatial tasks of the main spatial command.
    SpatialRunTasks {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Cleanup files created by running benchcab.
    Clean {
        #[command(flatten)]
        common: CommonArgs,

        /// Files to remove.
        #[arg(value_enum)]
        option: CleanOption,
    },
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Run { common, .. }
            | Command::ValidateConfig { common }
            | Command::Fluxsite { common, .. }
            | Command::Checkout { common }
            | Command::Build { common, .. }
            | Command::FluxsiteSetupWorkDir { common }
            | Command::FluxsiteSubmitJob { common, .. }
            | Command::FluxsiteRunTasks { common }
            | Command::FluxsiteBitwiseCmp { common }
            | Command::Spatial { common, .. }
            | Command::SpatialSetupWorkDir { common }
            | Command::SpatialRunTasks { common }
            | Command::Clean { common, .. } => common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CleanOption, Cli, Command, SkipStep};
    use clap::{CommandFactory, Parser};
    use std::path::Path;

    #[test]
    fn interface_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn composite_command_arguments() {
        let cli = Cli::parse_from([
            "benchcab",
            "fluxsite",
            "--no-submit",
            "--skip",
            "fluxsite-bitwise-cmp",
            "-c",
            "my-config.yaml",
        ]);

        match cli.command {
            Command::Fluxsite {
                common,
                no_submit,
                skip,
            } => {
                assert!(no_submit);
                assert_eq!(skip, vec![SkipStep::FluxsiteBitwiseCmp]);
                assert_eq!(common.config_path, Path::new("my-config.yaml"));
                assert!(!common.verbose);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn defaults_and_underscored_name() {
        let cli = Cli::parse_from(["benchcab", "validate_config", "-v"]);
        assert_eq!(cli.command.common().config_path, Path::new("config.yaml"));
        assert!(cli.command.common().verbose);

        let cli = Cli::parse_from(["benchcab", "clean", "realisations"]);
        assert!(matches!(
            cli.command,
            Command::Clean {
                option: CleanOption::Realisations,
                ..
            }
        ));
    }

    #[test]
    fn unknown_skip_is_rejected() {
        assert!(Cli::try_parse_from(["benchcab", "run", "--skip", "checkout"]).is_err());
    }
}

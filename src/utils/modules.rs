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

//! Wrapper around the environment modules system.
//!
//! `module` is a shell function, so instead of loading modules into
//! benchcab's own environment, commands that need modules are wrapped
//! to source the modules init script and load modules first.

use super::process::{quote, CmdOptions, ProcessRunner};
use crate::{
    constants::MODULES_INIT,
    errors::{ModulesError, ProcessError},
};
use std::fmt::Debug;

/// Capability of querying the environment modules system.
pub trait EnvironmentModules: Send + Sync + Debug {
    /// Wrapper around `module is-avail modulefile`.
    fn module_is_avail(
        &self,
        runner: &dyn ProcessRunner,
        module: &str,
    ) -> Result<bool, ModulesError>;

    /// Wrapper around `module is-loaded modulefile`.
    fn module_is_loaded(
        &self,
        runner: &dyn ProcessRunner,
        module: &str,
    ) -> Result<bool, ModulesError>;
}

/// Environment modules installed on the system.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SystemModules;

impl SystemModules {
    fn query(
        runner: &dyn ProcessRunner,
        subcommand: &str,
        module: &str,
    ) -> Result<bool, ModulesError> {
        let cmd = format!(
            "source {} && module {} {}",
            MODULES_INIT,
            subcommand,
            quote(module)
        );

        // module queries answer through the exit status
        match runner.run_cmd(&cmd, &CmdOptions::new().capture()) {
            Ok(_) => Ok(true),
            Err(ProcessError::Failed { .. }) => Ok(false),
            Err(err) => Err(ModulesError::Query(err)),
        }
    }
}

impl EnvironmentModules for SystemModules {
    fn module_is_avail(
        &self,
        runner: &dyn ProcessRunner,
        module: &str,
    ) -> Result<bool, ModulesError> {
        SystemModules::query(runner, "is-avail", module)
    }

    fn module_is_loaded(
        &self,
        runner: &dyn ProcessRunner,
        module: &str,
    ) -> Result<bool, ModulesError> {
        SystemModules::query(runner, "is-loaded", module)
    }
}

/// Prefixes `cmd` so that it runs with `modules` loaded.
///
/// Returns `cmd` unchanged when there are no modules to load.
pub fn wrap_with_modules(modules: &[String], cmd: &str) -> String {
    if modules.is_empty() {
        return cmd.to_string();
    }

    let names = modules
        .iter()
        .map(|m| quote(m).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    format!("source {} && module load {} && {}", MODULES_INIT, names, cmd)
}

#[cfg(test)]
pub use fake::FakeModules;

#[cfg(test)]
mod fake {
    use super::EnvironmentModules;
    use crate::{errors::ModulesError, utils::process::ProcessRunner};

    /// Modules system with a fixed set of available and loaded modules.
    #[derive(Clone, Debug, Default)]
    pub struct FakeModules {
        pub available: Vec<String>,
        pub loaded: Vec<String>,
    }

    impl EnvironmentModules for FakeModules {
        fn module_is_avail(
            &self,
            _runner: &dyn ProcessRunner,
            module: &str,
        ) -> Result<bool, ModulesError> {
            Ok(self.available.iter().any(|m| m == module))
        }

        fn module_is_loaded(
            &self,
            _runner: &dyn ProcessRunner,
            module: &str,
        ) -> Result<bool, ModulesError> {
            Ok(self.loaded.iter().any(|m| m == module))
        }
    }
}

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

//! Directory layout of a benchmark and the handle used to run
//! external commands inside it.

use crate::{
    constants::{CABLE_AUX_DIR, GRID_FILE, MET_DIR, NAMELIST_DIR, QSUB_FNAME, RUN_DIR, SRC_DIR},
    errors::ProcessError,
    utils::{
        modules::wrap_with_modules,
        process::{CmdOptions, CmdOutput, ProcessRunner},
    },
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Paths used by benchcab, all relative to the working
/// directory in which benchcab was started.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Paths {
    pub root: PathBuf,
    pub met_dir: PathBuf,
    pub grid_file: PathBuf,
}

impl Paths {
    pub fn new(root: &Path) -> Self {
        Paths {
            root: root.to_path_buf(),
            met_dir: PathBuf::from(MET_DIR),
            grid_file: Path::new(CABLE_AUX_DIR).join(GRID_FILE),
        }
    }

    /// Overrides the directory searched for met forcing files.
    #[cfg(test)]
    pub fn with_met_dir(mut self, met_dir: &Path) -> Self {
        self.met_dir = met_dir.to_path_buf();
        self
    }

    /// Directory with checked out realisations.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join(SRC_DIR)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(RUN_DIR)
    }

    /// User provided namelist files copied into every fluxsite task.
    pub fn namelist_dir(&self) -> PathBuf {
        self.root.join(NAMELIST_DIR)
    }

    pub fn fluxsite_dir(&self) -> PathBuf {
        self.run_dir().join("fluxsite")
    }

    pub fn fluxsite_log_dir(&self) -> PathBuf {
        self.fluxsite_dir().join("logs")
    }

    pub fn fluxsite_output_dir(&self) -> PathBuf {
        self.fluxsite_dir().join("outputs")
    }

    pub fn fluxsite_tasks_dir(&self) -> PathBuf {
        self.fluxsite_dir().join("tasks")
    }

    pub fn fluxsite_analysis_dir(&self) -> PathBuf {
        self.fluxsite_dir().join("analysis")
    }

    pub fn bitwise_cmp_dir(&self) -> PathBuf {
        self.fluxsite_analysis_dir().join("bitwise-comparisons")
    }

    /// All directories making up the fluxsite run tree, parents first.
    pub fn fluxsite_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.fluxsite_dir(),
            self.fluxsite_log_dir(),
            self.fluxsite_output_dir(),
            self.fluxsite_tasks_dir(),
            self.fluxsite_analysis_dir(),
            self.bitwise_cmp_dir(),
        ]
    }

    pub fn spatial_dir(&self) -> PathBuf {
        self.run_dir().join("spatial")
    }

    pub fn spatial_tasks_dir(&self) -> PathBuf {
        self.spatial_dir().join("tasks")
    }

    pub fn payu_laboratory_dir(&self) -> PathBuf {
        self.run_dir().join("payu-laboratory")
    }

    pub fn spatial_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.spatial_dir(),
            self.spatial_tasks_dir(),
            self.payu_laboratory_dir(),
        ]
    }

    pub fn qsub_file(&self) -> PathBuf {
        self.root.join(QSUB_FNAME)
    }
}

/// Handle shared by all units of work: the directory layout,
/// the process runner and the environment modules that must be
/// loaded for every command.
#[derive(Clone)]
pub struct Workspace {
    pub paths: Paths,
    runner: Arc<dyn ProcessRunner>,
    modules: Vec<String>,
}

impl Workspace {
    pub fn new(paths: Paths, runner: Arc<dyn ProcessRunner>) -> Self {
        Workspace {
            paths,
            runner,
            modules: vec![],
        }
    }

    /// Returns a copy of the workspace in which every command
    /// is run with `modules` loaded.
    pub fn with_modules(&self, modules: &[String]) -> Self {
        let mut loaded = self.modules.clone();
        loaded.extend(modules.iter().filter(|m| !self.modules.contains(m)).cloned());

        Workspace {
            paths: self.paths.clone(),
            runner: Arc::clone(&self.runner),
            modules: loaded,
        }
    }

    /// Runs `cmd` with the workspace modules loaded.
    pub fn run(&self, cmd: &str, options: &CmdOptions) -> Result<CmdOutput, ProcessError> {
        self.runner
            .run_cmd(&wrap_with_modules(&self.modules, cmd), options)
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("paths", &self.paths)
            .field("runner", &self.runner)
            .field("modules", &self.modules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Paths, Workspace};
    use crate::utils::process::{CmdOptions, FakeProcessRunner};
    use std::{path::Path, sync::Arc};

    #[test]
    fn fluxsite_tree() {
        let paths = Paths::new(Path::new("/scratch/bench"));

        assert_eq!(
            paths.bitwise_cmp_dir(),
            Path::new("/scratch/bench/runs/fluxsite/analysis/bitwise-comparisons")
        );
        assert_eq!(paths.fluxsite_dirs().len(), 6);
        assert_eq!(
            paths.payu_laboratory_dir(),
            Path::new("/scratch/bench/runs/payu-laboratory")
        );
    }

    #[test]
    fn modules_are_loaded_once() {
        let runner = Arc::new(FakeProcessRunner::new());
        let workspace = Workspace::new(Paths::new(Path::new(".")), runner.clone())
            .with_modules(&["netcdf/4.7.4".to_string()])
            .with_modules(&["netcdf/4.7.4".to_string(), "nccmp/1.8.5.0".to_string()]);

        workspace.run("nccmp -df a.nc b.nc", &CmdOptions::new()).unwrap();

        let commands = runner.commands();
        assert!(commands[0].contains("module load netcdf/4.7.4 nccmp/1.8.5.0 && nccmp -df"));
    }
}

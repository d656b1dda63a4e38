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

//! Module containing the benchmarking workflow.
//!
//! Every subcommand of benchcab is a method of [`Core`], which holds
//! the configuration, the realisations and the handles to external
//! tools. The composite subcommands (`fluxsite`, `spatial`, `run`)
//! are sequences of the single-step ones.
//!
//! The fluxsite workflow is:
//!
//! 1. checkout: every realisation is checked out into `src/<name>`,
//! 2. build: CABLE is compiled for every realisation,
//! 3. setup: a task directory is prepared for every combination of
//!    realisation, met forcing and science configuration,
//! 4. run: CABLE is run in each task directory, usually inside a PBS job,
//! 5. bitwise comparisons: outputs of different realisations for the same
//!    met forcing and science configuration are compared with `nccmp`.

mod comparison;
mod configuration;
mod executor;
mod fluxsite;
mod model;
mod pbs;
mod repo;
mod spatial;
mod workdir;
mod workspace;


use crate::{
    cli::{CleanOption, Cli, Command, SkipStep},
    constants::{FIVE_SITE_IDS, FORTY_TWO_SITE_IDS, GADI_NODENAME, NCCMP_MODULE, REQUIRED_GROUPS},
    errors::{BenchError, ConfigError, EnvironmentError, ModulesError, ProcessError},
    utils::{
        fs::{mkdir, next_path},
        modules::{EnvironmentModules, SystemModules},
        process::{quote_path, CmdOptions, RealProcessRunner},
    },
};
use comparison::ComparisonTask;
use configuration::Config;
use executor::{run_in_parallel, run_serially};
use fluxsite::{
    find_met_file, get_fluxsite_comparisons, get_fluxsite_tasks, get_met_forcing_file_names,
    list_file_names, FluxsiteTask,
};
use log::{debug, error, info};
use model::Model;
use pbs::JobScript;
use spatial::{get_spatial_tasks, SpatialTask};
use std::{
    collections::{BTreeSet, HashSet},
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use workdir::{
    clean_realisation_files, clean_submission_files, setup_fluxsite_directory_tree,
    setup_spatial_directory_tree,
};
use workspace::{Paths, Workspace};

/// Main benchcab function, dispatching the subcommand.
pub fn main(cli: Cli) -> Result<(), BenchError> {
    let common = cli.command.common().clone();

    if let Command::Clean { option, .. } = cli.command {
        let paths = Paths::new(&env::current_dir()?);
        return clean(&paths, option);
    }

    let core = Core::new(&common.config_path, common.verbose)?;

    match cli.command {
        Command::Run { skip, .. } => core.run(&skip),
        Command::ValidateConfig { .. } => {
            info!("Config file {} is valid", common.config_path.display());
            Ok(())
        }
        Command::Fluxsite {
            no_submit, skip, ..
        } => core.fluxsite(no_submit, &skip),
        Command::Checkout { .. } => core.checkout(),
        Command::Build { mpi, .. } => core.build(mpi),
        Command::FluxsiteSetupWorkDir { .. } => core.fluxsite_setup_work_directory(),
        Command::FluxsiteSubmitJob { skip, .. } => core.fluxsite_submit_job(&skip),
        Command::FluxsiteRunTasks { .. } => core.fluxsite_run_tasks(),
        Command::FluxsiteBitwiseCmp { .. } => core.fluxsite_bitwise_cmp(),
        Command::Spatial { .. } => core.spatial(),
        Command::SpatialSetupWorkDir { .. } => core.spatial_setup_work_directory(),
        Command::SpatialRunTasks { .. } => core.spatial_run_tasks(),
        Command::Clean { .. } => Ok(()),
    }
}

/// Endpoint for `benchcab clean`.
pub fn clean(paths: &Paths, option: CleanOption) -> Result<(), BenchError> {
    if matches!(option, CleanOption::All | CleanOption::Realisations) {
        info!("Removing realisation source code");
        clean_realisation_files(paths)?;
    }

    if matches!(option, CleanOption::All | CleanOption::Submissions) {
        info!("Removing run directories and job scripts");
        clean_submission_files(paths)?;
    }

    Ok(())
}

/// Structure containing everything needed to run the benchmark.
///
/// It is constructed once per invocation from the configuration file.
#[derive(Debug)]
pub struct Core {
    pub config: Config,
    pub config_path: PathBuf,
    pub workspace: Workspace,
    pub modules_handler: Arc<dyn EnvironmentModules>,
    pub models: Vec<Model>,

    /// Path of the benchcab executable, written into the PBS job script.
    pub benchcab_exe: Option<PathBuf>,

    /// Check the environment before running any step.
    pub validate_env: bool,
    pub verbose: bool,
}

impl Core {
    /// Benchmark [`Core`] constructor.
    ///
    /// Reads and checks the configuration, then creates
    /// the realisations in the current working directory.
    pub fn new(config_path: &Path, verbose: bool) -> Result<Self, BenchError> {
        debug!("Reading configuration from {}", config_path.display());
        let config = Config::new_from_file(config_path)?;

        let paths = Paths::new(&env::current_dir()?);
        let workspace = Workspace::new(paths, Arc::new(RealProcessRunner::new(verbose)));

        let mut core = Core::from_parts(config, config_path, workspace, Arc::new(SystemModules))?;
        core.benchcab_exe = env::current_exe().ok();
        core.verbose = verbose;

        Ok(core)
    }

    /// Assembles [`Core`] from already prepared parts.
    pub fn from_parts(
        config: Config,
        config_path: &Path,
        workspace: Workspace,
        modules_handler: Arc<dyn EnvironmentModules>,
    ) -> Result<Self, BenchError> {
        let src_dir = workspace.paths.src_dir();
        let models: Vec<Model> = config
            .realisations
            .iter()
            .enumerate()
            .map(|(id, realisation)| Model::new(id, realisation, &src_dir))
            .collect();

        let mut names = HashSet::new();
        if !models.iter().all(|model| names.insert(model.name.as_str())) {
            return Err(ConfigError::OutOfBounds(
                "Realisations checked out into the same directory, set unique 'name' for each",
            )
            .into());
        }

        Ok(Core {
            config,
            config_path: config_path.to_path_buf(),
            workspace,
            modules_handler,
            models,
            benchcab_exe: None,
            validate_env: true,
            verbose: false,
        })
    }

    /// Workspace in which every command runs with the configured modules loaded.
    fn workspace_with_modules(&self) -> Workspace {
        self.workspace.with_modules(&self.config.modules)
    }

    /// Performs checks on the current user environment.
    pub fn validate_environment(&self) -> Result<(), BenchError> {
        if !self.validate_env {
            return Ok(());
        }

        let runner = self.workspace.runner();

        let nodename = runner.run_cmd("uname -n", &CmdOptions::new().capture())?;
        if !nodename.stdout.contains(GADI_NODENAME) {
            return Err(EnvironmentError::WrongHost.into());
        }

        if !self.workspace.paths.namelist_dir().is_dir() {
            return Err(EnvironmentError::MissingNamelists.into());
        }

        let project = self.project()?;

        let groups = runner.run_cmd("id -Gn", &CmdOptions::new().capture())?;
        let groups: HashSet<&str> = groups.stdout.split_whitespace().collect();
        let required: BTreeSet<&str> = REQUIRED_GROUPS
            .iter()
            .copied()
            .chain(std::iter::once(project))
            .collect();
        if !required.iter().all(|group| groups.contains(group)) {
            let required = required.into_iter().collect::<Vec<_>>().join(", ");
            return Err(EnvironmentError::MissingGroups(required).into());
        }

        for module in &self.config.modules {
            if !self.modules_handler.module_is_avail(runner, module)? {
                return Err(ModulesError::NotAvailable(module.clone()).into());
            }
        }

        let met_dir = &self.workspace.paths.met_dir;
        let file_names = list_file_names(met_dir)?;
        let site_ids: BTreeSet<&str> = FIVE_SITE_IDS
            .iter()
            .chain(FORTY_TWO_SITE_IDS.iter())
            .copied()
            .collect();
        for site_id in site_ids {
            find_met_file(site_id, &file_names, met_dir)?;
        }

        Ok(())
    }

    fn project(&self) -> Result<&str, EnvironmentError> {
        self.config
            .project
            .as_deref()
            .ok_or(EnvironmentError::UnresolvedProject)
    }

    fn fluxsite_tasks(&self) -> Result<Vec<FluxsiteTask>, BenchError> {
        let forcing_files =
            get_met_forcing_file_names(&self.config.fluxsite, &self.workspace.paths.met_dir)?;

        Ok(get_fluxsite_tasks(
            &self.models,
            &self.config.science_configurations,
            &forcing_files,
        ))
    }

    fn spatial_tasks(&self) -> Vec<SpatialTask> {
        get_spatial_tasks(
            &self.models,
            &self.config.spatial.met_forcings,
            &self.config.science_configurations,
            self.config.spatial.payu.args.as_deref(),
        )
    }

    /// Endpoint for `benchcab checkout`.
    pub fn checkout(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        mkdir(&self.workspace.paths.src_dir())?;

        info!("Checking out repositories...");
        let runner = self.workspace.runner();
        let mut rev_number_log = String::new();

        for model in &self.models {
            if let Err(err) = model.repo.checkout(runner) {
                error!("Model checkout failed, probably due to existing realisation name");
                return Err(err.into());
            }
            rev_number_log += &format!("{}: {}\n", model.name, model.repo.revision(runner)?);
        }

        let rev_number_log_path = next_path(&self.workspace.paths.root, "rev_number", "-", ".log")?;
        info!(
            "Writing revision number info to {}",
            rev_number_log_path.display()
        );
        fs::write(&rev_number_log_path, rev_number_log)?;

        Ok(())
    }

    /// Endpoint for `benchcab build`.
    pub fn build(&self, mpi: bool) -> Result<(), BenchError> {
        self.validate_environment()?;

        let workspace = self.workspace_with_modules();

        for model in &self.models {
            if model.build_script.is_some() {
                info!(
                    "Compiling CABLE using custom build script for realisation {}",
                    model.name
                );
                model.custom_build(&workspace)?;
            } else {
                let build_mode = if mpi { "with MPI" } else { "serially" };
                info!(
                    "Compiling CABLE {} for realisation {}...",
                    build_mode, model.name
                );
                model.pre_build(mpi)?;
                model.run_build(&workspace, mpi)?;
                model.post_build(mpi)?;
            }
            info!("Successfully compiled CABLE for realisation {}", model.name);
        }

        Ok(())
    }

    /// Endpoint for `benchcab fluxsite-setup-work-dir`.
    pub fn fluxsite_setup_work_directory(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        info!("Setting up run directory tree for fluxsite tests...");
        setup_fluxsite_directory_tree(&self.workspace.paths)?;

        info!("Setting up tasks...");
        for task in self.fluxsite_tasks()? {
            task.setup_task(&self.workspace.paths)?;
        }
        info!("Successfully setup fluxsite tasks");

        Ok(())
    }

    /// Endpoint for `benchcab fluxsite-run-tasks`.
    pub fn fluxsite_run_tasks(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        let tasks = self.fluxsite_tasks()?;
        let workspace = self.workspace_with_modules();

        info!("Running fluxsite tasks...");
        if self.config.fluxsite.multiprocess {
            let ncpus = self.config.fluxsite.pbs.ncpus;
            run_in_parallel(tasks, &workspace, ncpus, "Fluxsite tasks")?;
        } else {
            run_serially(&tasks, &workspace)?;
        }
        info!("Successfully ran fluxsite tasks");

        Ok(())
    }

    /// Endpoint for `benchcab fluxsite-bitwise-cmp`.
    pub fn fluxsite_bitwise_cmp(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        // `nccmp -df` is used for bitwise comparisons
        let runner = self.workspace.runner();
        let workspace = if self.modules_handler.module_is_loaded(runner, NCCMP_MODULE)? {
            self.workspace.clone()
        } else {
            self.workspace.with_modules(&[NCCMP_MODULE.to_string()])
        };

        let comparisons: Vec<ComparisonTask> = get_fluxsite_comparisons(
            &self.fluxsite_tasks()?,
            &self.workspace.paths.fluxsite_output_dir(),
        );

        info!("Running comparison tasks...");
        if self.config.fluxsite.multiprocess {
            let ncpus = self.config.fluxsite.pbs.ncpus;
            run_in_parallel(comparisons, &workspace, ncpus, "Comparisons")?;
        } else {
            run_serially(&comparisons, &workspace)?;
        }
        info!("Successfully ran comparison tasks");

        Ok(())
    }

    /// Endpoint for `benchcab fluxsite-submit-job`.
    pub fn fluxsite_submit_job(&self, skip: &[SkipStep]) -> Result<(), BenchError> {
        self.validate_environment()?;

        let benchcab_exe = match &self.benchcab_exe {
            Some(exe) => exe,
            None => {
                return Err(EnvironmentError::UnknownExecutable(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "benchcab executable not found",
                ))
                .into())
            }
        };

        let job_script_path = self.workspace.paths.qsub_file();
        info!("Creating PBS job script to run fluxsite tasks on compute nodes");
        info!("job_script_path = {}", job_script_path.display());

        let contents = JobScript {
            project: self.project()?,
            config_path: &self.config_path.to_string_lossy(),
            modules: &self.config.modules,
            benchcab_path: &benchcab_exe.to_string_lossy(),
            pbs: &self.config.fluxsite.pbs,
            verbose: self.verbose,
            skip_bitwise_cmp: skip.contains(&SkipStep::FluxsiteBitwiseCmp),
        }
        .render();
        fs::write(&job_script_path, contents)?;

        let submission = self.workspace.runner().run_cmd(
            &format!("qsub {}", quote_path(&job_script_path)),
            &CmdOptions::new()
                .cwd(&self.workspace.paths.root)
                .capture(),
        );

        let output = match submission {
            Ok(output) => output,
            Err(err) => {
                error!("when submitting job to NCI queue, details to follow");
                if let ProcessError::Failed { output, .. } = &err {
                    error!("{}", output);
                }
                return Err(err.into());
            }
        };

        let paths = &self.workspace.paths;
        info!("PBS job submitted: {}", output.stdout.trim());
        info!("CABLE log file for each task is written to:");
        info!("{}/<task_name>_log.txt", paths.fluxsite_log_dir().display());
        info!("The CABLE standard output for each task is written to:");
        info!("{}/<task_name>/out.txt", paths.fluxsite_tasks_dir().display());
        info!("The NetCDF output for each task is written to:");
        info!("{}/<task_name>_out.nc", paths.fluxsite_output_dir().display());

        Ok(())
    }

    /// Endpoint for `benchcab fluxsite`.
    pub fn fluxsite(&self, no_submit: bool, skip: &[SkipStep]) -> Result<(), BenchError> {
        self.checkout()?;
        self.build(false)?;
        self.fluxsite_setup_work_directory()?;

        if no_submit {
            self.fluxsite_run_tasks()?;
            if !skip.contains(&SkipStep::FluxsiteBitwiseCmp) {
                self.fluxsite_bitwise_cmp()?;
            }
        } else {
            self.fluxsite_submit_job(skip)?;
        }

        Ok(())
    }

    /// Endpoint for `benchcab spatial-setup-work-dir`.
    pub fn spatial_setup_work_directory(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        info!("Setting up run directory tree for spatial tests...");
        setup_spatial_directory_tree(&self.workspace.paths)?;

        info!("Setting up tasks...");
        for task in self.spatial_tasks() {
            task.setup_task(&self.workspace, &self.config.spatial.payu.config)?;
        }
        info!("Successfully setup spatial tasks");

        Ok(())
    }

    /// Endpoint for `benchcab spatial-run-tasks`.
    pub fn spatial_run_tasks(&self) -> Result<(), BenchError> {
        self.validate_environment()?;

        info!("Running spatial tasks...");
        run_serially(&self.spatial_tasks(), &self.workspace)?;
        info!("Successfully dispatched payu jobs");

        Ok(())
    }

    /// Endpoint for `benchcab spatial`.
    pub fn spatial(&self) -> Result<(), BenchError> {
        self.checkout()?;
        self.build(true)?;
        self.spatial_setup_work_directory()?;
        self.spatial_run_tasks()
    }

    /// Endpoint for `benchcab run`.
    pub fn run(&self, skip: &[SkipStep]) -> Result<(), BenchError> {
        self.checkout()?;
        self.build(false)?;
        self.build(true)?;
        self.fluxsite_setup_work_directory()?;
        self.spatial_setup_work_directory()?;
        self.fluxsite_submit_job(skip)?;
        self.spatial_run_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::{configuration::Config, workspace::{Paths, Workspace}, Core};
    use crate::{
        errors::{BenchError, ConfigError, EnvironmentError, ModulesError},
        utils::{modules::FakeModules, process::FakeProcessRunner},
    };
    use std::{fs, path::Path, sync::Arc};

    const CONFIG: &str = "
project: tm70
modules: [intel-compiler/2021.1.1, netcdf/4.7.4]
realisations:
  - repo: {git: {branch: main}}
  - repo: {git: {branch: dev}}
fluxsite:
  experiment: AU-Tum
";

    fn test_core(root: &Path, runner: FakeProcessRunner, modules: FakeModules) -> Core {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        let met_dir = root.join("met");
        let paths = Paths::new(root).with_met_dir(&met_dir);
        let workspace = Workspace::new(paths, Arc::new(runner));
        Core::from_parts(config, Path::new("config.yaml"), workspace, Arc::new(modules)).unwrap()
    }

    fn gadi_runner() -> FakeProcessRunner {
        FakeProcessRunner::new()
            .respond_to("uname -n", "gadi-login-01.gadi.nci.org.au\n")
            .respond_to("id -Gn", "tm70 ks32 hh5 wd9\n")
    }

    fn all_modules() -> FakeModules {
        FakeModules {
            available: vec!["intel-compiler/2021.1.1".into(), "netcdf/4.7.4".into()],
            loaded: vec![],
        }
    }

    fn prepare_met_dir(root: &Path) {
        let met_dir = root.join("met");
        fs::create_dir_all(&met_dir).unwrap();
        for site_id in crate::constants::FORTY_TWO_SITE_IDS {
            fs::write(met_dir.join(format!("{}_Met.nc", site_id)), "").unwrap();
        }
        fs::create_dir_all(root.join("namelists")).unwrap();
    }

    #[test]
    fn valid_environment() {
        let dir = tempfile::tempdir().unwrap();
        prepare_met_dir(dir.path());

        let core = test_core(dir.path(), gadi_runner(), all_modules());
        core.validate_environment().unwrap();
    }

    #[test]
    fn wrong_host() {
        let dir = tempfile::tempdir().unwrap();
        prepare_met_dir(dir.path());
        let runner = FakeProcessRunner::new().respond_to("uname -n", "laptop\n");

        let core = test_core(dir.path(), runner, all_modules());
        assert!(matches!(
            core.validate_environment(),
            Err(BenchError::Environment(EnvironmentError::WrongHost))
        ));
    }

    #[test]
    fn missing_group() {
        let dir = tempfile::tempdir().unwrap();
        prepare_met_dir(dir.path());
        let runner = FakeProcessRunner::new()
            .respond_to("uname -n", "gadi.nci.org.au\n")
            .respond_to("id -Gn", "tm70 ks32\n");

        let core = test_core(dir.path(), runner, all_modules());
        match core.validate_environment() {
            Err(BenchError::Environment(EnvironmentError::MissingGroups(groups))) => {
                assert_eq!(groups, "hh5, ks32, tm70");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unavailable_module() {
        let dir = tempfile::tempdir().unwrap();
        prepare_met_dir(dir.path());
        let modules = FakeModules {
            available: vec!["intel-compiler/2021.1.1".into()],
            loaded: vec![],
        };

        let core = test_core(dir.path(), gadi_runner(), modules);
        assert!(matches!(
            core.validate_environment(),
            Err(BenchError::Modules(ModulesError::NotAvailable(m))) if m == "netcdf/4.7.4"
        ));
    }

    #[test]
    fn missing_met_file() {
        let dir = tempfile::tempdir().unwrap();
        prepare_met_dir(dir.path());
        fs::remove_file(dir.path().join("met/US-Whs_Met.nc")).unwrap();

        let core = test_core(dir.path(), gadi_runner(), all_modules());
        assert!(matches!(
            core.validate_environment(),
            Err(BenchError::Environment(EnvironmentError::MissingMetFile(site, _))) if site == "US-Whs"
        ));
    }

    #[test]
    fn disabled_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = test_core(dir.path(), FakeProcessRunner::new(), FakeModules::default());
        core.validate_env = false;

        assert!(core.validate_environment().is_ok());
    }

    #[test]
    fn clashing_realisation_directories() {
        let config: Config = serde_yaml::from_str(
            "modules: []\nrealisations:\n  - repo: {git: {branch: main}}\n  - repo: {git: {branch: main, url: fork}}\n",
        )
        .unwrap();
        let workspace = Workspace::new(
            Paths::new(Path::new(".")),
            Arc::new(FakeProcessRunner::new()),
        );

        let result = Core::from_parts(
            config,
            Path::new("config.yaml"),
            workspace,
            Arc::new(FakeModules::default()),
        );
        assert!(matches!(result, Err(BenchError::Config(ConfigError::OutOfBounds(_)))));
    }
}

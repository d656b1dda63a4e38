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

//! Fluxsite tasks: single-site CABLE runs forced with PLUMBER2 met data.
//!
//! Every task is one combination of a model, a met forcing file and
//! a science configuration. Tasks of different models sharing the same
//! forcing and configuration are paired into bitwise comparisons.

use super::{
    comparison::ComparisonTask, configuration::Fluxsite, executor::Runnable, model::Model,
    workspace::{Paths, Workspace},
};
use crate::{
    constants::{
        CABLE_EXE, CABLE_FIXED_CO2_CONC, CABLE_NML, CABLE_SOIL_NML, CABLE_STDOUT_FILENAME,
        CABLE_VEGETATION_NML, NCO_MODULE,
    },
    errors::{BenchError, EnvironmentError, ProcessError},
    utils::{
        fs::{copy, copy_dir_contents, mkdir, remove_file_if_exists},
        namelist::{self, flatten, patch_namelist, patch_remove_namelist, NmlNode, NmlTree, NmlValue},
        process::{quote, quote_path, CmdOptions},
    },
};
use log::{debug, error};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Clone, PartialEq, Debug)]
pub struct FluxsiteTask {
    pub model: Model,
    pub met_forcing_file: String,
    pub sci_conf_id: usize,
    pub sci_config: NmlTree,
    name: String,
}

impl FluxsiteTask {
    pub fn new(model: Model, met_forcing_file: &str, sci_conf_id: usize, sci_config: NmlTree) -> Self {
        let name = format!(
            "{}_R{}_S{}",
            forcing_stem(met_forcing_file),
            model.id,
            sci_conf_id
        );

        FluxsiteTask {
            model,
            met_forcing_file: met_forcing_file.to_string(),
            sci_conf_id,
            sci_config,
            name,
        }
    }

    /// File name of the NetCDF output.
    pub fn output_filename(&self) -> String {
        format!("{}_out.nc", self.name)
    }

    pub fn log_filename(&self) -> String {
        format!("{}_log.txt", self.name)
    }

    pub fn task_dir(&self, paths: &Paths) -> PathBuf {
        paths.fluxsite_tasks_dir().join(&self.name)
    }

    pub fn output_path(&self, paths: &Paths) -> PathBuf {
        paths.fluxsite_output_dir().join(self.output_filename())
    }

    pub fn log_path(&self, paths: &Paths) -> PathBuf {
        paths.fluxsite_log_dir().join(self.log_filename())
    }

    /// Prepares the task directory so that CABLE can be run in it.
    ///
    /// Stale files are removed, namelists and the executable are copied in
    /// and `cable.nml` is patched with the base settings of the task, the
    /// science configuration and the realisation patches, in that order.
    pub fn setup_task(&self, paths: &Paths) -> Result<(), BenchError> {
        debug!("Setting up task: {}", self.name);

        mkdir(&self.task_dir(paths))?;

        self.clean_task(paths)?;
        self.fetch_files(paths)?;

        let nml_path = self.task_dir(paths).join(CABLE_NML);

        debug!("  Adding base configurations to CABLE namelist file {}", nml_path.display());
        patch_namelist(&nml_path, &self.base_patch(paths))?;

        debug!("  Adding science configurations to CABLE namelist file {}", nml_path.display());
        patch_namelist(&nml_path, &self.sci_config)?;

        if let Some(patch) = &self.model.patch {
            debug!(
                "  Adding branch specific configurations to CABLE namelist file {}",
                nml_path.display()
            );
            patch_namelist(&nml_path, patch)?;
        }

        if let Some(patch_remove) = &self.model.patch_remove {
            debug!(
                "  Removing branch specific configurations from CABLE namelist file {}",
                nml_path.display()
            );
            patch_remove_namelist(&nml_path, patch_remove)?;
        }

        Ok(())
    }

    /// Removes executable, namelists, output and log of a previous run.
    pub fn clean_task(&self, paths: &Paths) -> Result<(), BenchError> {
        debug!("  Cleaning task");

        let task_dir = self.task_dir(paths);

        for file in [CABLE_EXE, CABLE_NML, CABLE_VEGETATION_NML, CABLE_SOIL_NML] {
            remove_file_if_exists(&task_dir.join(file))?;
        }

        remove_file_if_exists(&self.output_path(paths))?;
        remove_file_if_exists(&self.log_path(paths))?;

        Ok(())
    }

    /// Copies the namelists directory and the CABLE executable into the task directory.
    pub fn fetch_files(&self, paths: &Paths) -> Result<(), BenchError> {
        let task_dir = self.task_dir(paths);

        copy_dir_contents(&paths.namelist_dir(), &task_dir)?;

        let exe_src = self.model.exe_path(false);
        let exe_dest = task_dir.join(CABLE_EXE);
        debug!(
            "  Copying CABLE executable from {} to {}",
            exe_src.display(),
            exe_dest.display()
        );
        copy(&exe_src, &exe_dest)?;

        Ok(())
    }

    fn base_patch(&self, paths: &Paths) -> NmlTree {
        let filename = tree(vec![
            ("met", string(paths.met_dir.join(&self.met_forcing_file))),
            ("out", string(self.output_path(paths))),
            ("log", string(self.log_path(paths))),
            ("restart_out", NmlValue::Str(" ".into()).into()),
            ("type", string(paths.grid_file.clone())),
        ]);

        let output = tree(vec![("restart", NmlValue::Bool(false).into())]);

        let cable = tree(vec![
            ("filename", NmlNode::Group(filename)),
            ("output", NmlNode::Group(output)),
            ("fixedCO2", NmlValue::Float(CABLE_FIXED_CO2_CONC).into()),
            ("spinup", NmlValue::Bool(false).into()),
        ]);

        tree(vec![("cable", NmlNode::Group(cable))])
    }

    /// Runs the CABLE executable in the task directory.
    fn run_cable(&self, workspace: &Workspace) -> Result<(), ProcessError> {
        let task_dir = self.task_dir(&workspace.paths);

        workspace.run(
            &format!("./{} {}", CABLE_EXE, CABLE_NML),
            &CmdOptions::new()
                .cwd(&task_dir)
                .output_file(&task_dir.join(CABLE_STDOUT_FILENAME)),
        )?;

        Ok(())
    }

    /// Adds the namelist used for the run, branch name, revision and
    /// benchcab version as global attributes of the NetCDF output.
    pub fn add_provenance_info(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let output_path = self.output_path(&workspace.paths);
        let nml = namelist::read(&self.task_dir(&workspace.paths).join(CABLE_NML))?;

        let mut attributes = match nml.get("cable") {
            Some(NmlNode::Group(cable)) => flatten(cable, "%"),
            _ => vec![],
        };
        attributes.push((
            "cable_branch".into(),
            NmlValue::Str(self.model.repo.branch_name()),
        ));
        attributes.push((
            "svn_revision_number".into(),
            NmlValue::Str(self.model.repo.revision(workspace.runner())?),
        ));
        attributes.push((
            "benchcab_version".into(),
            NmlValue::Str(env!("CARGO_PKG_VERSION").into()),
        ));

        debug!("Adding attributes to output file: {}", output_path.display());

        let mut cmd = "ncatted -O -h".to_string();
        for (name, value) in &attributes {
            cmd.push_str(" -a ");
            cmd.push_str(&quote(&ncatted_attribute(name, value)));
        }
        cmd.push(' ');
        cmd.push_str(&quote_path(&output_path));

        workspace
            .with_modules(&[NCO_MODULE.to_string()])
            .run(&cmd, &CmdOptions::new().capture())?;

        Ok(())
    }
}

impl Runnable for FluxsiteTask {
    fn name(&self) -> &str {
        &self.name
    }

    /// Runs CABLE and adds provenance to its output.
    ///
    /// A failing CABLE run is logged and does not fail the task, so that
    /// comparisons can still be run on whatever outputs were produced.
    fn run(&self, workspace: &Workspace) -> Result<(), BenchError> {
        debug!(
            "Running task {}... CABLE standard output saved in {}",
            self.name,
            self.task_dir(&workspace.paths)
                .join(CABLE_STDOUT_FILENAME)
                .display()
        );

        match self.run_cable(workspace) {
            Ok(()) => self.add_provenance_info(workspace),
            Err(ProcessError::Failed { .. }) => {
                error!("CABLE returned an error for task {}", self.name);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Returns the cross product of models, forcing files and science configurations.
pub fn get_fluxsite_tasks(
    models: &[Model],
    science_configurations: &[NmlTree],
    forcing_files: &[String],
) -> Vec<FluxsiteTask> {
    let mut tasks = vec![];

    for model in models {
        for file_name in forcing_files {
            for (sci_conf_id, sci_config) in science_configurations.iter().enumerate() {
                tasks.push(FluxsiteTask::new(
                    model.clone(),
                    file_name,
                    sci_conf_id,
                    sci_config.clone(),
                ));
            }
        }
    }

    tasks
}

/// Pairs tasks with the same forcing and science configuration
/// but different models.
///
/// Each unordered pair of models appears once, with the lower model id first.
pub fn get_fluxsite_comparisons(tasks: &[FluxsiteTask], output_dir: &Path) -> Vec<ComparisonTask> {
    let mut comparisons = vec![];

    for task_a in tasks {
        for task_b in tasks {
            if task_a.met_forcing_file == task_b.met_forcing_file
                && task_a.sci_conf_id == task_b.sci_conf_id
                && task_a.model.id < task_b.model.id
            {
                comparisons.push(ComparisonTask::new(
                    comparison_name(
                        &task_a.model,
                        &task_b.model,
                        &task_a.met_forcing_file,
                        task_a.sci_conf_id,
                    ),
                    (
                        output_dir.join(task_a.output_filename()),
                        output_dir.join(task_b.output_filename()),
                    ),
                ));
            }
        }
    }

    comparisons
}

pub fn comparison_name(
    model_a: &Model,
    model_b: &Model,
    met_forcing_file: &str,
    sci_conf_id: usize,
) -> String {
    format!(
        "{}_S{}_R{}_R{}",
        forcing_stem(met_forcing_file),
        sci_conf_id,
        model_a.id,
        model_b.id
    )
}

/// Finds the met forcing file of every site in the experiment.
///
/// Each site id must match exactly one file in `met_dir`.
pub fn get_met_forcing_file_names(
    fluxsite: &Fluxsite,
    met_dir: &Path,
) -> Result<Vec<String>, BenchError> {
    let file_names = list_file_names(met_dir)?;
    let mut forcing_files = vec![];

    for site_id in fluxsite.site_ids()? {
        forcing_files.push(find_met_file(&site_id, &file_names, met_dir)?);
    }

    Ok(forcing_files)
}

pub(super) fn list_file_names(dir: &Path) -> Result<Vec<String>, BenchError> {
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub(super) fn find_met_file(
    site_id: &str,
    file_names: &[String],
    met_dir: &Path,
) -> Result<String, EnvironmentError> {
    let mut matching = file_names.iter().filter(|name| name.starts_with(site_id));

    match (matching.next(), matching.next()) {
        (Some(name), None) => Ok(name.clone()),
        (None, _) => Err(EnvironmentError::MissingMetFile(
            site_id.to_string(),
            met_dir.to_path_buf(),
        )),
        (Some(_), Some(_)) => Err(EnvironmentError::AmbiguousMetFile(
            site_id.to_string(),
            met_dir.to_path_buf(),
        )),
    }
}

/// Forcing file name up to the first `.`.
fn forcing_stem(met_forcing_file: &str) -> &str {
    met_forcing_file
        .split('.')
        .next()
        .unwrap_or(met_forcing_file)
}

fn tree(entries: Vec<(&str, NmlNode)>) -> NmlTree {
    entries
        .into_iter()
        .map(|(key, node)| (key.to_string(), node))
        .collect()
}

fn string(path: PathBuf) -> NmlNode {
    NmlValue::Str(path.to_string_lossy().into_owned()).into()
}

/// Single `-a` argument of `ncatted` overwriting a global attribute.
fn ncatted_attribute(name: &str, value: &NmlValue) -> String {
    let (nc_type, text) = match value {
        NmlValue::Bool(_) => ("c", value.to_fortran()),
        NmlValue::Int(val) => ("ll", val.to_string()),
        NmlValue::Float(val) => ("d", val.to_string()),
        NmlValue::Str(val) => ("c", val.clone()),
        NmlValue::List(vals) => {
            let joined = |vals: &[NmlValue]| {
                vals.iter()
                    .map(|val| match val {
                        NmlValue::Int(v) => v.to_string(),
                        NmlValue::Float(v) => v.to_string(),
                        other => other.to_fortran(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            };

            if vals.iter().all(|v| matches!(v, NmlValue::Int(_))) {
                ("ll", joined(vals))
            } else if vals
                .iter()
                .all(|v| matches!(v, NmlValue::Int(_) | NmlValue::Float(_)))
            {
                ("d", joined(vals))
            } else {
                ("c", value.to_fortran())
            }
        }
    };

    format!("{},global,o,{},{}", name, nc_type, text)
}

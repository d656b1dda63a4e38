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

//! Spatial tasks: global or regional CABLE runs driven by payu experiments.

use super::{executor::Runnable, model::Model, workspace::Workspace};
use crate::{
    constants::CABLE_NML,
    errors::BenchError,
    utils::{
        namelist::{patch_namelist, patch_remove_namelist, NmlTree},
        process::{quote, quote_path, CmdOptions},
    },
};
use indexmap::IndexMap;
use log::debug;
use serde_yaml::{Mapping, Value};
use std::{fs, path::PathBuf};

#[derive(Clone, PartialEq, Debug)]
pub struct SpatialTask {
    pub model: Model,
    pub met_forcing_name: String,
    pub met_forcing_payu_experiment: String,
    pub sci_conf_id: usize,
    pub sci_config: NmlTree,
    pub payu_args: Option<String>,
    name: String,
}

impl SpatialTask {
    pub fn new(
        model: Model,
        met_forcing_name: &str,
        met_forcing_payu_experiment: &str,
        sci_conf_id: usize,
        sci_config: NmlTree,
        payu_args: Option<String>,
    ) -> Self {
        let name = format!("{}_R{}_S{}", met_forcing_name, model.id, sci_conf_id);

        SpatialTask {
            model,
            met_forcing_name: met_forcing_name.to_string(),
            met_forcing_payu_experiment: met_forcing_payu_experiment.to_string(),
            sci_conf_id,
            sci_config,
            payu_args,
            name,
        }
    }

    pub fn task_dir(&self, workspace: &Workspace) -> PathBuf {
        workspace.paths.spatial_tasks_dir().join(&self.name)
    }

    /// Clones the payu experiment and configures it to run this task.
    pub fn setup_task(&self, workspace: &Workspace, payu_config: &Mapping) -> Result<(), BenchError> {
        debug!("Setting up task: {}", self.name);

        self.clone_experiment(workspace)?;
        self.configure_experiment(workspace, payu_config)?;
        self.update_namelist(workspace)?;

        Ok(())
    }

    pub fn clone_experiment(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let cmd = format!(
            "git clone {} {}",
            quote(&self.met_forcing_payu_experiment),
            quote_path(&self.task_dir(workspace))
        );
        workspace.run(&cmd, &CmdOptions::new())?;

        Ok(())
    }

    /// Updates `config.yaml` of the experiment with user provided payu
    /// settings, the MPI executable and the payu laboratory.
    pub fn configure_experiment(
        &self,
        workspace: &Workspace,
        payu_config: &Mapping,
    ) -> Result<(), BenchError> {
        let config_path = self.task_dir(workspace).join("config.yaml");

        let text = fs::read_to_string(&config_path)?;
        let mut config = if text.trim().is_empty() {
            Mapping::new()
        } else {
            match serde_yaml::from_str::<Value>(&text)? {
                Value::Mapping(config) => config,
                _ => Mapping::new(),
            }
        };

        debug!("  Updating experiment config parameters in {}", config_path.display());

        deep_update(&mut config, payu_config);

        let exe = self.model.exe_path(true);
        config.insert("exe".into(), exe.to_string_lossy().into_owned().into());

        // keep inputs of the experiment, payu needs the key present
        let input_key = Value::from("input");
        if !config.contains_key(&input_key) {
            config.insert(input_key, Value::Sequence(vec![]));
        }

        let laboratory = workspace.paths.payu_laboratory_dir();
        config.insert(
            "laboratory".into(),
            laboratory.to_string_lossy().into_owned().into(),
        );

        fs::write(&config_path, serde_yaml::to_string(&config)?)?;

        Ok(())
    }

    /// Patches `cable.nml` of the experiment with the science
    /// configuration and the realisation patches.
    pub fn update_namelist(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let nml_path = self.task_dir(workspace).join(CABLE_NML);

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
}

impl Runnable for SpatialTask {
    fn name(&self) -> &str {
        &self.name
    }

    /// Submits the experiment with `payu run`.
    fn run(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let cmd = match &self.payu_args {
            Some(args) => format!("payu run {}", args),
            None => "payu run".to_string(),
        };

        workspace.run(&cmd, &CmdOptions::new().cwd(&self.task_dir(workspace)))?;

        Ok(())
    }
}

/// Returns the cross product of models, met forcings and science configurations.
pub fn get_spatial_tasks(
    models: &[Model],
    met_forcings: &IndexMap<String, String>,
    science_configurations: &[NmlTree],
    payu_args: Option<&str>,
) -> Vec<SpatialTask> {
    let mut tasks = vec![];

    for model in models {
        for (met_forcing_name, payu_experiment) in met_forcings {
            for (sci_conf_id, sci_config) in science_configurations.iter().enumerate() {
                tasks.push(SpatialTask::new(
                    model.clone(),
                    met_forcing_name,
                    payu_experiment,
                    sci_conf_id,
                    sci_config.clone(),
                    payu_args.map(String::from),
                ));
            }
        }
    }

    tasks
}

/// Recursively merges `patch` into `base`.
fn deep_update(base: &mut Mapping, patch: &Mapping) {
    for (key, value) in patch {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(base_map)), Value::Mapping(patch_map)) => {
                deep_update(base_map, patch_map);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

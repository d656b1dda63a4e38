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

//! Module responsible for parsing and checking the configuration file.
//!
//! To provide meaningful error messages the configuration file uses
//! [YAML](https://en.wikipedia.org/wiki/YAML) and `serde` to enforce
//! strong typing and automatic type checking.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside `config.yaml` so you can check this documentation
//! for more details how to set the config file.

use crate::{
    constants::{
        experiment_site_ids, CABLE_GIT_URL, DEFAULT_EXPERIMENT, DEFAULT_MULTIPROCESS,
        DEFAULT_PBS_MEM, DEFAULT_PBS_NCPUS, DEFAULT_PBS_WALLTIME, FIVE_SITE_IDS,
        SPATIAL_DEFAULT_MET_FORCINGS,
    },
    errors::ConfigError,
    utils::namelist::{NmlNode, NmlTree, NmlValue},
};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

/// Specification of the repository holding a realisation's source code.
///
/// Exactly one of the `git`, `svn` or `local` keys must be given.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum RepoSpec {
    Git {
        /// Branch to clone.
        branch: String,

        /// _(Optional)_ URL of the repository. Defaults to the
        /// CABLE repository on GitHub.
        #[serde(default = "RepoSpec::default_git_url")]
        url: String,

        /// _(Optional)_ Commit hash to hard reset to after cloning.
        #[serde(default)]
        commit: Option<String>,
    },
    Svn {
        /// Path to the branch relative to the CABLE SVN root.
        branch_path: String,

        /// _(Optional)_ Revision to check out. Defaults to HEAD.
        #[serde(default)]
        revision: Option<u64>,
    },
    Local {
        /// Directory with the source code, which gets symlinked.
        path: PathBuf,
    },
}

impl RepoSpec {
    fn default_git_url() -> String {
        CABLE_GIT_URL.to_string()
    }
}

/// Single model version (realisation) to benchmark.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Realisation {
    /// _(Optional)_ Name of the realisation, used as its source directory
    /// name. Defaults to the branch name.
    #[serde(default)]
    pub name: Option<String>,

    pub repo: RepoSpec,

    /// _(Optional)_ Namelist parameters added to `cable.nml` for
    /// every task of this realisation.
    #[serde(default)]
    pub patch: Option<NmlTree>,

    /// _(Optional)_ Namelist parameters removed from `cable.nml` for
    /// every task of this realisation.
    #[serde(default)]
    pub patch_remove: Option<NmlTree>,

    /// _(Optional)_ Path of a custom build script, relative to the
    /// realisation source directory.
    #[serde(default)]
    pub build_script: Option<PathBuf>,
}

/// _(Optional)_ PBS resources requested by the fluxsite job.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pbs {
    /// Number of CPUs. Also the size of the worker pool
    /// when fluxsite tasks are run in parallel.
    ///
    /// Cannot be less than `1`. Defaults to `18`.
    #[serde(default = "Pbs::default_ncpus")]
    pub ncpus: usize,

    /// Memory, e.g. `30GB`.
    #[serde(default = "Pbs::default_mem")]
    pub mem: String,

    /// Walltime, e.g. `6:00:00`.
    #[serde(default = "Pbs::default_walltime")]
    pub walltime: String,

    /// Extra storage flags, e.g. `gdata/tm70`.
    #[serde(default)]
    pub storage: Vec<String>,
}

impl Pbs {
    fn default_ncpus() -> usize {
        DEFAULT_PBS_NCPUS
    }

    fn default_mem() -> String {
        DEFAULT_PBS_MEM.to_string()
    }

    fn default_walltime() -> String {
        DEFAULT_PBS_WALLTIME.to_string()
    }

    /// Checks if requested resources are sensible.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.ncpus < 1 {
            return Err(ConfigError::OutOfBounds(
                "Number of CPUs cannot be less than 1",
            ));
        }

        if self.mem.trim().is_empty() {
            return Err(ConfigError::OutOfBounds("PBS memory cannot be empty"));
        }

        if self.walltime.trim().is_empty() {
            return Err(ConfigError::OutOfBounds("PBS walltime cannot be empty"));
        }

        Ok(())
    }
}

impl Default for Pbs {
    fn default() -> Self {
        Pbs {
            ncpus: Pbs::default_ncpus(),
            mem: Pbs::default_mem(),
            walltime: Pbs::default_walltime(),
            storage: vec![],
        }
    }
}

/// _(Optional)_ Settings of the fluxsite test suite.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fluxsite {
    /// Experiment to run: `five-site-test`, `forty-two-site-test`
    /// or a single site id of the five site test.
    ///
    /// Defaults to `forty-two-site-test`.
    #[serde(default = "Fluxsite::default_experiment")]
    pub experiment: String,

    /// Run tasks and comparisons on a worker pool
    /// of `pbs.ncpus` threads. Defaults to `true`.
    #[serde(default = "Fluxsite::default_multiprocess")]
    pub multiprocess: bool,

    #[serde(default)]
    pub pbs: Pbs,
}

impl Fluxsite {
    fn default_experiment() -> String {
        DEFAULT_EXPERIMENT.to_string()
    }

    fn default_multiprocess() -> bool {
        DEFAULT_MULTIPROCESS
    }

    /// Returns site ids selected by the experiment.
    pub fn site_ids(&self) -> Result<Vec<String>, ConfigError> {
        if FIVE_SITE_IDS.contains(&self.experiment.as_str()) {
            return Ok(vec![self.experiment.clone()]);
        }

        experiment_site_ids(&self.experiment)
            .map(|ids| ids.iter().map(|id| id.to_string()).collect())
            .ok_or_else(|| ConfigError::UnknownExperiment(self.experiment.clone()))
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        self.site_ids()?;
        self.pbs.check_bounds()
    }
}

impl Default for Fluxsite {
    fn default() -> Self {
        Fluxsite {
            experiment: Fluxsite::default_experiment(),
            multiprocess: Fluxsite::default_multiprocess(),
            pbs: Pbs::default(),
        }
    }
}

/// _(Optional)_ Settings passed to payu.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payu {
    /// Parameters merged into the `config.yaml` of every payu experiment.
    #[serde(default)]
    pub config: serde_yaml::Mapping,

    /// Extra command line arguments of `payu run`.
    #[serde(default)]
    pub args: Option<String>,
}

/// _(Optional)_ Settings of the spatial test suite.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Spatial {
    /// Met forcing names mapped to URLs of payu experiments.
    #[serde(default = "Spatial::default_met_forcings")]
    pub met_forcings: IndexMap<String, String>,

    #[serde(default)]
    pub payu: Payu,
}

impl Spatial {
    fn default_met_forcings() -> IndexMap<String, String> {
        SPATIAL_DEFAULT_MET_FORCINGS
            .iter()
            .map(|(name, url)| (name.to_string(), url.to_string()))
            .collect()
    }
}

impl Default for Spatial {
    fn default() -> Self {
        Spatial {
            met_forcings: Spatial::default_met_forcings(),
            payu: Payu::default(),
        }
    }
}

/// Main config structure representing the fields in
/// configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// _(Optional)_ NCI project used for PBS jobs.
    /// Defaults to `$PROJECT`.
    #[serde(default = "Config::default_project")]
    pub project: Option<String>,

    /// Environment modules loaded for building and running CABLE.
    pub modules: Vec<String>,

    /// Model versions to benchmark. Their position in this list
    /// is the model id used in task names.
    pub realisations: Vec<Realisation>,

    /// _(Optional)_ Namelist settings defining each science configuration.
    /// Defaults to the four combinations of `GS_SWITCH` (medlyn, leuning)
    /// and `FWSOIL_SWITCH` (Haverd2013, standard).
    #[serde(default = "Config::default_science_configurations")]
    pub science_configurations: Vec<NmlTree>,

    #[serde(default)]
    pub fluxsite: Fluxsite,

    #[serde(default)]
    pub spatial: Spatial,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        let config: Config = serde_yaml::from_slice(data.as_slice())?;

        config.check_bounds()?;

        Ok(config)
    }

    /// Checks the whole configuration for values
    /// that cannot be caught by deserialization.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.realisations.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "At least one realisation must be specified",
            ));
        }

        let mut names = HashSet::new();
        for name in self.realisations.iter().filter_map(|r| r.name.as_ref()) {
            if name.trim().is_empty() {
                return Err(ConfigError::OutOfBounds("Realisation name cannot be empty"));
            }
            if !names.insert(name) {
                return Err(ConfigError::OutOfBounds("Realisation names must be unique"));
            }
        }

        if self.science_configurations.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "At least one science configuration must be specified",
            ));
        }

        self.fluxsite.check_bounds()?;

        Ok(())
    }

    fn default_project() -> Option<String> {
        env::var("PROJECT").ok().filter(|project| !project.is_empty())
    }

    fn default_science_configurations() -> Vec<NmlTree> {
        [
            ("medlyn", "Haverd2013"),
            ("leuning", "Haverd2013"),
            ("medlyn", "standard"),
            ("leuning", "standard"),
        ]
        .iter()
        .map(|(gs_switch, fwsoil_switch)| {
            let cable_user: NmlTree = [
                ("GS_SWITCH", gs_switch),
                ("FWSOIL_SWITCH", fwsoil_switch),
            ]
            .iter()
            .map(|(key, val)| (key.to_string(), NmlNode::from(NmlValue::Str(val.to_string()))))
            .collect();

            let cable: NmlTree = [("cable_user".to_string(), NmlNode::Group(cable_user))]
                .into_iter()
                .collect();

            [("cable".to_string(), NmlNode::Group(cable))]
                .into_iter()
                .collect()
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, RepoSpec};
    use crate::{
        constants::{CABLE_GIT_URL, DEFAULT_PBS_NCPUS},
        errors::ConfigError,
    };
    use std::path::PathBuf;

    const MINIMAL: &str = "
project: tm70
modules: [intel-compiler/2021.1.1, netcdf/4.7.4]
realisations:
  - repo:
      git:
        branch: main
  - name: svn_trunk
    repo:
      svn:
        branch_path: trunk
        revision: 9000
";

    fn parse(yaml: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.check_bounds()?;
        Ok(config)
    }

    #[test]
    fn defaults_are_filled_in() {
        let config = parse(MINIMAL).unwrap();

        assert_eq!(config.project.as_deref(), Some("tm70"));
        assert_eq!(config.science_configurations.len(), 4);
        assert_eq!(config.fluxsite.experiment, "forty-two-site-test");
        assert!(config.fluxsite.multiprocess);
        assert_eq!(config.fluxsite.pbs.ncpus, DEFAULT_PBS_NCPUS);
        assert_eq!(config.fluxsite.pbs.mem, "30GB");
        assert!(config.spatial.met_forcings.contains_key("crujra_access"));
        assert_eq!(config.spatial.payu.args, None);

        assert_eq!(
            config.realisations[0].repo,
            RepoSpec::Git {
                branch: "main".into(),
                url: CABLE_GIT_URL.into(),
                commit: None
            }
        );
        assert_eq!(
            config.realisations[1].repo,
            RepoSpec::Svn {
                branch_path: "trunk".into(),
                revision: Some(9000)
            }
        );
    }

    #[test]
    fn partial_pbs_keeps_other_defaults() {
        let yaml = format!("{}fluxsite:\n  pbs:\n    ncpus: 4\n", MINIMAL);
        let config = parse(&yaml).unwrap();

        assert_eq!(config.fluxsite.pbs.ncpus, 4);
        assert_eq!(config.fluxsite.pbs.walltime, "6:00:00");
    }

    #[test]
    fn local_repo_and_patches() {
        let yaml = "
modules: []
realisations:
  - name: my_branch
    repo:
      local:
        path: /home/user/CABLE
    patch:
      cable:
        cable_user:
          FWSOIL_SWITCH: Lai_and_Ktaul_2011
    build_script: offline/build3.sh
science_configurations:
  - cable: {cable_user: {GS_SWITCH: medlyn}}
";
        let config = parse(yaml).unwrap();
        let realisation = &config.realisations[0];

        assert_eq!(
            realisation.repo,
            RepoSpec::Local {
                path: PathBuf::from("/home/user/CABLE")
            }
        );
        assert!(realisation.patch.is_some());
        assert_eq!(realisation.build_script, Some(PathBuf::from("offline/build3.sh")));
        assert_eq!(config.science_configurations.len(), 1);
    }

    #[test]
    fn missing_required_key() {
        let result = parse("modules: []\n");
        assert!(matches!(result, Err(ConfigError::CantDeserialize(_))));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let yaml = format!("{}unexpected: 1\n", MINIMAL);
        assert!(matches!(parse(&yaml), Err(ConfigError::CantDeserialize(_))));
    }

    #[test]
    fn empty_realisations() {
        let result = parse("modules: []\nrealisations: []\n");
        assert!(matches!(result, Err(ConfigError::OutOfBounds(_))));
    }

    #[test]
    fn duplicate_names() {
        let yaml = "
modules: []
realisations:
  - {name: a, repo: {git: {branch: main}}}
  - {name: a, repo: {git: {branch: dev}}}
";
        assert!(matches!(parse(yaml), Err(ConfigError::OutOfBounds(_))));
    }

    #[test]
    fn experiments() {
        let single_site = format!("{}fluxsite:\n  experiment: AU-Tum\n", MINIMAL);
        let config = parse(&single_site).unwrap();
        assert_eq!(config.fluxsite.site_ids().unwrap(), vec!["AU-Tum".to_string()]);

        let five = format!("{}fluxsite:\n  experiment: five-site-test\n", MINIMAL);
        assert_eq!(parse(&five).unwrap().fluxsite.site_ids().unwrap().len(), 5);

        let unknown = format!("{}fluxsite:\n  experiment: mars-test\n", MINIMAL);
        assert!(matches!(parse(&unknown), Err(ConfigError::UnknownExperiment(_))));
    }

    #[test]
    fn zero_cpus() {
        let yaml = format!("{}fluxsite:\n  pbs:\n    ncpus: 0\n", MINIMAL);
        assert!(matches!(parse(&yaml), Err(ConfigError::OutOfBounds(_))));
    }
}

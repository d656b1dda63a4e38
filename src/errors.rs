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

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Error while reading config.yaml: {0}")]
    Config(#[from] ConfigError),

    #[error("External command failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("Namelist error: {0}")]
    Namelist(#[from] NamelistError),

    #[error("Environment modules error: {0}")]
    Modules(#[from] ModulesError),

    #[error("Environment check failed: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Error while creating ThreadPool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read or write YAML file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Build script {0} could not be found. Do you need to specify a different build script with the 'build_script' option in config.yaml?")]
    MissingBuildScript(PathBuf),

    #[error("Worker pool stopped before all units reported back")]
    WorkerLost,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config.yaml: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize config.yaml: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),

    #[error("Unknown fluxsite experiment '{0}'")]
    UnknownExperiment(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Cannot spawn '{0}': {1}")]
    CantSpawn(String, std::io::Error),

    #[error("Cannot open output file {0}: {1}")]
    CantOpenOutput(PathBuf, std::io::Error),

    #[error("'{cmd}' exited with {}", describe_code(.code))]
    Failed {
        cmd: String,
        code: Option<i32>,
        output: String,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Checkout of {0} failed, probably due to existing realisation name. Try using `benchcab clean realisations` first")]
    CheckoutFailed(String, #[source] ProcessError),

    #[error("Cannot create symlink {0}: {1}")]
    CantSymlink(PathBuf, std::io::Error),

    #[error("Cannot query revision: {0}")]
    Revision(#[from] ProcessError),
}

#[derive(Error, Debug)]
pub enum NamelistError {
    #[error("Cannot access namelist file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error in namelist at line {0}: {1}")]
    Syntax(usize, String),

    #[error("Namelist parameters specified in `patch_remove` do not exist in {file}: '{key}'")]
    MissingKey { key: String, file: String },

    #[error("Top-level namelist entry '{0}' is not a group")]
    NotAGroup(String),
}

#[derive(Error, Debug)]
pub enum ModulesError {
    #[error("Module ({0}) is not available")]
    NotAvailable(String),

    #[error("Cannot query environment modules: {0}")]
    Query(#[from] ProcessError),
}

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("benchcab is currently implemented only on Gadi")]
    WrongHost,

    #[error("Cannot find 'namelists' directory in current working directory")]
    MissingNamelists,

    #[error("Couldn't resolve project: check 'project' in config.yaml and/or $PROJECT set in ~/.config/gadi-login.conf")]
    UnresolvedProject,

    #[error("User does not have the required group permissions. The required groups are: {0}")]
    MissingGroups(String),

    #[error("Failed to infer met file for site id '{0}' in {1}")]
    MissingMetFile(String, PathBuf),

    #[error("Multiple paths inferred for site id '{0}' in {1}")]
    AmbiguousMetFile(String, PathBuf),

    #[error("Path to benchcab executable is undefined: {0}")]
    UnknownExecutable(std::io::Error),

    #[error("Cannot query the environment: {0}")]
    Query(#[from] ProcessError),
}

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

//! Bitwise comparisons of model outputs with `nccmp`.

use super::{executor::Runnable, workspace::Workspace};
use crate::{
    errors::{BenchError, ProcessError},
    utils::process::{quote_path, CmdOptions},
};
use log::{debug, error, info};
use std::{fs, path::PathBuf};

/// Comparison of two NetCDF output files that should be bitwise identical.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ComparisonTask {
    pub name: String,
    pub files: (PathBuf, PathBuf),
}

impl ComparisonTask {
    pub fn new(name: String, files: (PathBuf, PathBuf)) -> Self {
        ComparisonTask { name, files }
    }
}

impl Runnable for ComparisonTask {
    fn name(&self) -> &str {
        &self.name
    }

    /// Executes `nccmp -df` on the compared files.
    ///
    /// Differing files are not an error of the task: the diff is written
    /// to the bitwise comparisons directory and the task succeeds.
    fn run(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let (file_a, file_b) = &self.files;
        let display_a = file_a.file_name().unwrap_or_default().to_string_lossy();
        let display_b = file_b.file_name().unwrap_or_default().to_string_lossy();

        debug!("Comparing files {} and {} bitwise...", display_a, display_b);

        let cmd = format!("nccmp -df {} {}", quote_path(file_a), quote_path(file_b));

        match workspace.run(&cmd, &CmdOptions::new().capture()) {
            Ok(_) => {
                info!("Success: files {} {} are identical", display_a, display_b);
            }
            Err(ProcessError::Failed { output, .. }) => {
                let output_file = workspace
                    .paths
                    .bitwise_cmp_dir()
                    .join(format!("{}.txt", self.name));
                fs::write(&output_file, output)?;

                error!("Failure: files {} {} differ.", display_a, display_b);
                error!("Results of diff have been written to {}", output_file.display());
            }
            Err(err) => return Err(err.into()),
        }

        Ok(())
    }
}

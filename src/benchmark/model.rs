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

//! CABLE model versions (realisations) and the steps needed to build them.

use super::{configuration::Realisation, repo::Repo, workspace::Workspace};
use crate::{
    constants::{CABLE_EXE, CABLE_MPI_EXE, OFFLINE_SOURCE_FILES, TMP_BUILD_DIR, TMP_BUILD_DIR_MPI},
    errors::BenchError,
    utils::{
        fs::{copy, mkdir, rename},
        namelist::NmlTree,
        process::CmdOptions,
    },
};
use log::debug;
use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

const TMP_BUILD_SCRIPT: &str = "tmp-build.sh";

/// A single CABLE version taking part in the benchmark.
///
/// `id` is the position of the realisation in the configuration file
/// and is used in names of tasks and comparisons.
#[derive(Clone, PartialEq, Debug)]
pub struct Model {
    pub id: usize,
    pub name: String,
    pub repo: Repo,
    pub patch: Option<NmlTree>,
    pub patch_remove: Option<NmlTree>,
    pub build_script: Option<PathBuf>,

    /// Location of the CABLE sources inside the repository.
    /// Git and local repositories keep them under `src/`.
    src_subdir: PathBuf,
}

impl Model {
    pub fn new(id: usize, realisation: &Realisation, src_dir: &Path) -> Self {
        let repo = Repo::new(&realisation.repo, src_dir, realisation.name.as_deref());

        let name = realisation
            .name
            .clone()
            .unwrap_or_else(|| repo.branch_name());

        let src_subdir = match repo {
            Repo::Git { .. } | Repo::Local { .. } => PathBuf::from("src"),
            Repo::Svn { .. } => PathBuf::new(),
        };

        Model {
            id,
            name,
            repo,
            patch: realisation.patch.clone(),
            patch_remove: realisation.patch_remove.clone(),
            build_script: realisation.build_script.clone(),
            src_subdir,
        }
    }

    /// Directory containing the `offline/`, `science/` etc. directories.
    pub fn source_dir(&self) -> PathBuf {
        self.repo.path().join(&self.src_subdir)
    }

    pub fn exe_path(&self, mpi: bool) -> PathBuf {
        self.source_dir()
            .join("offline")
            .join(if mpi { CABLE_MPI_EXE } else { CABLE_EXE })
    }

    fn tmp_build_dir(&self, mpi: bool) -> PathBuf {
        self.source_dir()
            .join(if mpi { TMP_BUILD_DIR_MPI } else { TMP_BUILD_DIR })
    }

    /// Builds CABLE with the user provided build script.
    ///
    /// The script is copied to `tmp-build.sh` with all lines calling
    /// environment modules removed, as modules are loaded by `workspace`.
    pub fn custom_build(&self, workspace: &Workspace) -> Result<(), BenchError> {
        let script = match &self.build_script {
            Some(script) => self.repo.path().join(script),
            None => return Ok(()),
        };

        if !script.is_file() {
            return Err(BenchError::MissingBuildScript(script));
        }

        let script_dir = script.parent().unwrap_or_else(|| Path::new("."));
        let tmp_script = script_dir.join(TMP_BUILD_SCRIPT);

        debug!("Copying {} to {}", script.display(), tmp_script.display());
        copy(&script, &tmp_script)?;

        debug!("chmod +x {}", tmp_script.display());
        let mut permissions = fs::metadata(&tmp_script)?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(&tmp_script, permissions)?;

        debug!(
            "Modifying {}: remove lines that call environment modules",
            TMP_BUILD_SCRIPT
        );
        remove_module_lines(&tmp_script)?;

        workspace.run(
            &format!("./{}", TMP_BUILD_SCRIPT),
            &CmdOptions::new().cwd(script_dir),
        )?;

        Ok(())
    }

    /// Copies sources and the Makefile into a temporary build directory.
    pub fn pre_build(&self, mpi: bool) -> Result<(), BenchError> {
        let source_dir = self.source_dir();
        let tmp_dir = self.tmp_build_dir(mpi);

        mkdir(&tmp_dir)?;

        for (dir, suffix) in OFFLINE_SOURCE_FILES.iter() {
            let dir = source_dir.join(dir);
            if !dir.is_dir() {
                continue;
            }

            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let matches = path
                    .file_name()
                    .map_or(false, |name| name.to_string_lossy().ends_with(suffix));

                if matches && path.is_file() {
                    copy(&path, &tmp_dir.join(file_name(&path)))?;
                }
            }
        }

        copy(
            &source_dir.join("offline").join("Makefile"),
            &tmp_dir.join("Makefile"),
        )?;

        Ok(())
    }

    /// Runs `make` in the temporary build directory.
    ///
    /// NetCDF locations are only known after modules are loaded,
    /// so the compiler variables are exported inside the build command.
    pub fn run_build(&self, workspace: &Workspace, mpi: bool) -> Result<(), BenchError> {
        let cmd = format!(
            "export NCDIR=\"$NETCDF_ROOT/lib/Intel\" \
             NCMOD=\"$NETCDF_ROOT/include/Intel\" \
             CFLAGS='-O2 -fp-model precise' \
             LDFLAGS=\"-L$NETCDF_ROOT/lib/Intel -O0\" \
             LD='-lnetcdf -lnetcdff' \
             FC={} && {}",
            if mpi { "mpif90" } else { "ifort" },
            if mpi { "make mpi" } else { "make" }
        );

        workspace.run(&cmd, &CmdOptions::new().cwd(&self.tmp_build_dir(mpi)))?;

        Ok(())
    }

    /// Moves the built executable into `offline/`.
    pub fn post_build(&self, mpi: bool) -> Result<(), BenchError> {
        let exe = if mpi { CABLE_MPI_EXE } else { CABLE_EXE };
        rename(&self.tmp_build_dir(mpi).join(exe), &self.exe_path(mpi))?;
        Ok(())
    }
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_default()
}

/// Removes lines from the script at `path` that call the
/// environment modules package.
pub fn remove_module_lines(path: &Path) -> io::Result<()> {
    let contents = fs::read_to_string(path)?;

    let kept: String = contents
        .split_inclusive('\n')
        .filter(|line| match shlex::split(line) {
            Some(words) => !words.iter().any(|word| word == "module"),
            None => true,
        })
        .collect();

    fs::write(path, kept)
}

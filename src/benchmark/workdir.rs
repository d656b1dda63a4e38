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

//! Creation and removal of the benchmark directory tree.

use super::workspace::Paths;
use crate::{constants::QSUB_FNAME, utils::fs::mkdir};
use log::debug;
use std::{fs, io, path::Path};

pub fn setup_fluxsite_directory_tree(paths: &Paths) -> io::Result<()> {
    for dir in paths.fluxsite_dirs() {
        mkdir(&dir)?;
    }
    Ok(())
}

pub fn setup_spatial_directory_tree(paths: &Paths) -> io::Result<()> {
    for dir in paths.spatial_dirs() {
        mkdir(&dir)?;
    }
    Ok(())
}

/// Removes checked out realisations and revision logs.
///
/// Symlinked local realisations are unlinked first,
/// so that their targets are left untouched.
pub fn clean_realisation_files(paths: &Paths) -> io::Result<()> {
    let src_dir = paths.src_dir();

    if src_dir.is_dir() {
        for entry in fs::read_dir(&src_dir)? {
            let path = entry?.path();
            if path.is_symlink() {
                debug!("Unlinking {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        debug!("Removing {}", src_dir.display());
        fs::remove_dir_all(&src_dir)?;
    }

    remove_matching(&paths.root, |name| {
        name.starts_with("rev_number-") && name.ends_with(".log")
    })
}

/// Removes the run directory and PBS job scripts.
pub fn clean_submission_files(paths: &Paths) -> io::Result<()> {
    let run_dir = paths.run_dir();

    if run_dir.is_dir() {
        debug!("Removing {}", run_dir.display());
        fs::remove_dir_all(&run_dir)?;
    }

    remove_matching(&paths.root, |name| name.starts_with(QSUB_FNAME))
}

fn remove_matching(dir: &Path, matches: impl Fn(&str) -> bool) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && matches(&entry.file_name().to_string_lossy()) {
            debug!("Removing {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        clean_realisation_files, clean_submission_files, setup_fluxsite_directory_tree,
        setup_spatial_directory_tree,
    };
    use crate::benchmark::workspace::Paths;
    use std::{fs, os::unix::fs::symlink};

    #[test]
    fn directory_trees() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());

        setup_fluxsite_directory_tree(&paths).unwrap();
        setup_spatial_directory_tree(&paths).unwrap();

        for path in paths.fluxsite_dirs().iter().chain(paths.spatial_dirs().iter()) {
            assert!(path.is_dir(), "{} missing", path.display());
        }
    }

    #[test]
    fn cleaning_realisations_keeps_local_sources() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let local = tempfile::tempdir().unwrap();
        fs::write(local.path().join("keep.F90"), "").unwrap();

        fs::create_dir_all(paths.src_dir().join("main")).unwrap();
        symlink(local.path(), paths.src_dir().join("local")).unwrap();
        fs::write(dir.path().join("rev_number-1.log"), "").unwrap();
        fs::write(dir.path().join("config.yaml"), "").unwrap();

        clean_realisation_files(&paths).unwrap();

        assert!(!paths.src_dir().exists());
        assert!(!dir.path().join("rev_number-1.log").exists());
        assert!(dir.path().join("config.yaml").exists());
        assert!(local.path().join("keep.F90").exists());
    }

    #[test]
    fn cleaning_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        setup_fluxsite_directory_tree(&paths).unwrap();
        fs::write(dir.path().join("benchmark_cable_qsub.sh"), "").unwrap();
        fs::write(dir.path().join("benchmark_cable_qsub.sh.o12345"), "").unwrap();

        clean_submission_files(&paths).unwrap();

        assert!(!paths.run_dir().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

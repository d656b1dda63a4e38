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

//! Filesystem helpers logging every operation at `debug` level.

use log::debug;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Creates `path` and all of its missing parents.
pub fn mkdir(path: &Path) -> io::Result<()> {
    debug!("Creating {} directory", path.display());
    fs::create_dir_all(path)
}

/// A wrapper around [`fs::copy`] with logging.
pub fn copy(src: &Path, dest: &Path) -> io::Result<()> {
    debug!("cp -p {} {}", src.display(), dest.display());
    fs::copy(src, dest)?;
    Ok(())
}

/// A wrapper around [`fs::rename`] with logging.
pub fn rename(src: &Path, dest: &Path) -> io::Result<()> {
    debug!("mv {} {}", src.display(), dest.display());
    fs::rename(src, dest)
}

/// Removes the file at `path` if it exists.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

/// Recursively copies contents of `src` directory into `dest`,
/// overwriting existing files.
pub fn copy_dir_contents(src: &Path, dest: &Path) -> io::Result<()> {
    debug!("Copying contents of {} to {}", src.display(), dest.display());

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Finds the next free path in a sequentially numbered list of files
/// `{stem}{sep}{N}{suffix}` inside `dir`.
///
/// For example, with `rev_number-1.log` and `rev_number-2.log` present
/// the next path is `rev_number-3.log`.
pub fn next_path(dir: &Path, stem: &str, sep: &str, suffix: &str) -> io::Result<PathBuf> {
    let prefix = format!("{}{}", stem, sep);
    let mut last_index = 0;

    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();

            let index = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .and_then(|index| index.parse::<u64>().ok());

            if let Some(index) = index {
                last_index = last_index.max(index);
            }
        }
    }

    Ok(dir.join(format!("{}{}{}", prefix, last_index + 1, suffix)))
}

#[cfg(test)]
mod tests {
    use super::{copy_dir_contents, next_path, remove_file_if_exists};
    use std::fs;

    #[test]
    fn next_path_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            next_path(dir.path(), "rev_number", "-", ".log").unwrap(),
            dir.path().join("rev_number-1.log")
        );
    }

    #[test]
    fn next_path_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["rev_number-1.log", "rev_number-9.log", "rev_number-10.log", "other-99.log"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        assert_eq!(
            next_path(dir.path(), "rev_number", "-", ".log").unwrap(),
            dir.path().join("rev_number-11.log")
        );
    }

    #[test]
    fn copying_nested_directories() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("cable.nml"), "&cable\n/\n").unwrap();
        fs::write(src.path().join("nested/pft_params.nml"), "&veg\n/\n").unwrap();
        fs::write(dest.path().join("cable.nml"), "stale").unwrap();

        copy_dir_contents(src.path(), dest.path()).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("cable.nml")).unwrap(), "&cable\n/\n");
        assert!(dest.path().join("nested/pft_params.nml").is_file());
    }

    #[test]
    fn removing_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_file_if_exists(&dir.path().join("missing")).is_ok());
    }
}

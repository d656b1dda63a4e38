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

//! Source code repositories of the realisations.
//!
//! Git and SVN repositories are handled through their command line
//! clients, local repositories are symlinked into the source directory.

use super::configuration::RepoSpec;
use crate::{
    constants::CABLE_SVN_ROOT,
    errors::{ProcessError, RepoError},
    utils::process::{quote, quote_path, CmdOptions, ProcessRunner},
};
use log::{debug, info};
use std::{
    env,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Repo {
    Git {
        url: String,
        branch: String,
        commit: Option<String>,
        path: PathBuf,
    },
    Svn {
        branch_path: String,
        revision: Option<u64>,
        path: PathBuf,
    },
    Local {
        local_path: PathBuf,
        path: PathBuf,
    },
}

impl Repo {
    /// Creates a repository checked out into `src_dir/<name>`, where
    /// `name` defaults to the branch name.
    pub fn new(spec: &RepoSpec, src_dir: &Path, name: Option<&str>) -> Self {
        let branch_name = spec_branch_name(spec);
        let path = src_dir.join(name.unwrap_or(&branch_name));

        match spec {
            RepoSpec::Git {
                branch,
                url,
                commit,
            } => Repo::Git {
                url: url.clone(),
                branch: branch.clone(),
                commit: commit.clone(),
                path,
            },
            RepoSpec::Svn {
                branch_path,
                revision,
            } => Repo::Svn {
                branch_path: branch_path.clone(),
                revision: *revision,
                path,
            },
            RepoSpec::Local { path: local_path } => Repo::Local {
                local_path: local_path.clone(),
                path,
            },
        }
    }

    /// Directory holding the checked out source code.
    pub fn path(&self) -> &Path {
        match self {
            Repo::Git { path, .. } | Repo::Svn { path, .. } | Repo::Local { path, .. } => path,
        }
    }

    pub fn branch_name(&self) -> String {
        match self {
            Repo::Git { branch, .. } => branch.clone(),
            Repo::Svn { branch_path, .. } => last_component(Path::new(branch_path)),
            Repo::Local { local_path, .. } => last_component(local_path),
        }
    }

    /// Checks out the source code into [`Repo::path`].
    pub fn checkout(&self, runner: &dyn ProcessRunner) -> Result<(), RepoError> {
        let name = self.branch_name();
        let failed = |err: ProcessError| RepoError::CheckoutFailed(name.clone(), err);

        match self {
            Repo::Git {
                url,
                branch,
                commit,
                path,
            } => {
                let cmd = format!(
                    "git clone --branch {} -- {} {}",
                    quote(branch),
                    quote(url),
                    quote_path(path)
                );
                runner.run_cmd(&cmd, &CmdOptions::new()).map_err(failed)?;

                if let Some(commit) = commit {
                    debug!("Reset to commit {} (hard reset)", commit);
                    runner
                        .run_cmd(
                            &format!("git reset --hard {}", quote(commit)),
                            &CmdOptions::new().cwd(path),
                        )
                        .map_err(failed)?;
                }
            }
            Repo::Svn {
                branch_path,
                revision,
                path,
            } => {
                let mut cmd = "svn checkout".to_string();
                if let Some(revision) = revision {
                    cmd += &format!(" -r {}", revision);
                }
                cmd += &format!(
                    " {} {}",
                    quote(&format!("{}/{}", CABLE_SVN_ROOT, branch_path)),
                    quote_path(path)
                );

                runner.run_cmd(&cmd, &CmdOptions::new()).map_err(failed)?;
            }
            Repo::Local { local_path, path } => {
                let target = absolute(local_path)
                    .map_err(|err| RepoError::CantSymlink(path.clone(), err))?;

                debug!("ln -s {} {}", target.display(), path.display());
                symlink(&target, path).map_err(|err| RepoError::CantSymlink(path.clone(), err))?;
            }
        }

        info!(
            "Successfully checked out {} - {}",
            name,
            self.revision(runner)?
        );

        Ok(())
    }

    /// Human readable description of the checked out revision.
    pub fn revision(&self, runner: &dyn ProcessRunner) -> Result<String, RepoError> {
        match self {
            Repo::Git { path, .. } => {
                let output =
                    runner.run_cmd("git rev-parse HEAD", &CmdOptions::new().cwd(path).capture())?;
                Ok(format!("commit {}", output.stdout.trim()))
            }
            Repo::Svn { path, .. } => {
                let cmd = format!(
                    "svn info --show-item last-changed-revision {}",
                    quote_path(path)
                );
                let output = runner.run_cmd(&cmd, &CmdOptions::new().capture())?;
                Ok(format!("last-changed-revision {}", output.stdout.trim()))
            }
            Repo::Local { local_path, .. } => {
                let local_path = absolute(local_path)
                    .map_err(|err| RepoError::CantSymlink(local_path.clone(), err))?;
                Ok(format!("Local CABLE build: {}", local_path.display()))
            }
        }
    }
}

fn spec_branch_name(spec: &RepoSpec) -> String {
    match spec {
        RepoSpec::Git { branch, .. } => branch.clone(),
        RepoSpec::Svn { branch_path, .. } => last_component(Path::new(branch_path)),
        RepoSpec::Local { path } => last_component(path),
    }
}

fn last_component(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::Repo;
    use crate::{
        benchmark::configuration::RepoSpec,
        constants::{CABLE_GIT_URL, CABLE_SVN_ROOT},
        errors::RepoError,
        utils::process::FakeProcessRunner,
    };
    use std::path::{Path, PathBuf};

    fn git(commit: Option<&str>) -> RepoSpec {
        RepoSpec::Git {
            branch: "main".into(),
            url: CABLE_GIT_URL.into(),
            commit: commit.map(String::from),
        }
    }

    #[test]
    fn checkout_paths_and_branch_names() {
        let src = Path::new("src");

        let repo = Repo::new(&git(None), src, None);
        assert_eq!(repo.path(), Path::new("src/main"));
        assert_eq!(repo.branch_name(), "main");

        let repo = Repo::new(&git(None), src, Some("trunk_copy"));
        assert_eq!(repo.path(), Path::new("src/trunk_copy"));

        let svn = RepoSpec::Svn {
            branch_path: "branches/Users/sb8430/test-branch".into(),
            revision: None,
        };
        assert_eq!(Repo::new(&svn, src, None).branch_name(), "test-branch");

        let local = RepoSpec::Local {
            path: PathBuf::from("/home/user/CABLE-dev"),
        };
        assert_eq!(Repo::new(&local, src, None).path(), Path::new("src/CABLE-dev"));
    }

    #[test]
    fn git_checkout_with_commit() {
        let runner = FakeProcessRunner::new().respond_to("git rev-parse HEAD", "abc123\n");
        let repo = Repo::new(&git(Some("abc123")), Path::new("src"), None);

        repo.checkout(&runner).unwrap();

        let commands = runner.commands();
        assert_eq!(
            shlex::split(&commands[0]).unwrap(),
            vec!["git", "clone", "--branch", "main", "--", CABLE_GIT_URL, "src/main"]
        );
        assert_eq!(commands[1], "git reset --hard abc123");
        assert_eq!(repo.revision(&runner).unwrap(), "commit abc123");

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].1.cwd.as_deref(), Some(Path::new("src/main")));
    }

    #[test]
    fn svn_checkout_with_revision() {
        let runner = FakeProcessRunner::new().respond_to("svn info", "9000\n");
        let spec = RepoSpec::Svn {
            branch_path: "trunk".into(),
            revision: Some(9000),
        };
        let repo = Repo::new(&spec, Path::new("src"), None);

        repo.checkout(&runner).unwrap();

        let trunk_url = format!("{}/trunk", CABLE_SVN_ROOT);
        assert_eq!(
            shlex::split(&runner.commands()[0]).unwrap(),
            vec!["svn", "checkout", "-r", "9000", trunk_url.as_str(), "src/trunk"]
        );
        assert_eq!(
            repo.revision(&runner).unwrap(),
            "last-changed-revision 9000"
        );
    }

    #[test]
    fn failed_clone() {
        let runner = FakeProcessRunner::new().fail_on("git clone", "already exists");
        let repo = Repo::new(&git(None), Path::new("src"), None);

        assert!(matches!(
            repo.checkout(&runner),
            Err(RepoError::CheckoutFailed(..))
        ));
    }

    #[test]
    fn local_checkout_is_a_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("my-cable");
        std::fs::create_dir(&local).unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();

        let runner = FakeProcessRunner::new();
        let repo = Repo::new(&RepoSpec::Local { path: local.clone() }, &src, None);
        repo.checkout(&runner).unwrap();

        assert_eq!(std::fs::read_link(src.join("my-cable")).unwrap(), local);
        assert!(runner.commands().is_empty());
        assert_eq!(
            repo.revision(&runner).unwrap(),
            format!("Local CABLE build: {}", local.display())
        );
    }
}

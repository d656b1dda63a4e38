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

//! Module responsible for running external commands.
//!
//! Every external tool benchcab depends on (`git`, `svn`, `qsub`,
//! `make`, the CABLE executable, `nccmp`, `payu`) is executed through
//! the [`ProcessRunner`] trait, so that the whole workflow can be
//! exercised in tests with a fake runner that never spawns processes.
//!
//! Commands are shell strings interpreted by `bash`, with the working
//! directory passed explicitly for each command. The runner never changes
//! the working directory of benchcab itself, so commands can be safely
//! executed from several threads at once.

use crate::{constants::SYSTEM_PATHS, errors::ProcessError};
use log::debug;
use std::{
    borrow::Cow,
    env,
    fmt::Debug,
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Options changing how a single command is executed.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CmdOptions {
    /// Directory in which the command is run.
    /// Defaults to the current working directory.
    pub cwd: Option<PathBuf>,

    /// Capture combined stdout and stderr and return it
    /// in [`CmdOutput::stdout`].
    pub capture_output: bool,

    /// Redirect combined stdout and stderr to this file.
    /// Ignored when `capture_output` is set.
    pub output_file: Option<PathBuf>,
}

impl CmdOptions {
    pub fn new() -> Self {
        CmdOptions::default()
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture_output = true;
        self
    }

    pub fn output_file(mut self, path: &Path) -> Self {
        self.output_file = Some(path.to_path_buf());
        self
    }
}

/// Result of a successfully finished command.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CmdOutput {
    /// Combined stdout and stderr, empty unless output was captured.
    pub stdout: String,
}

/// Capability of running shell commands.
pub trait ProcessRunner: Send + Sync + Debug {
    /// Runs `cmd` and waits for it to exit.
    ///
    /// Returns [`ProcessError::Failed`] when the command exits with
    /// non-zero status, carrying the captured output (if any).
    fn run_cmd(&self, cmd: &str, options: &CmdOptions) -> Result<CmdOutput, ProcessError>;
}

/// Runner spawning real processes with `bash -c`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RealProcessRunner {
    /// When set, output of commands that is neither captured nor
    /// redirected to a file is shown in the terminal.
    pub verbose: bool,
}

impl RealProcessRunner {
    pub fn new(verbose: bool) -> Self {
        RealProcessRunner { verbose }
    }
}

impl ProcessRunner for RealProcessRunner {
    fn run_cmd(&self, cmd: &str, options: &CmdOptions) -> Result<CmdOutput, ProcessError> {
        debug!("{}", cmd);

        // stderr is merged into stdout for the whole script
        let script = format!("exec 2>&1\n{}", cmd);

        let mut command = Command::new("bash");
        command.arg("-c").arg(script).stdin(Stdio::null());
        command.env("PATH", prioritised_path());

        if let Some(dir) = &options.cwd {
            command.current_dir(dir);
        }

        if options.capture_output {
            command.stdout(Stdio::piped());
        } else if let Some(path) = &options.output_file {
            let file = File::create(path)
                .map_err(|err| ProcessError::CantOpenOutput(path.clone(), err))?;
            command.stdout(Stdio::from(file));
        } else if self.verbose {
            command.stdout(Stdio::inherit());
        } else {
            command.stdout(Stdio::null());
        }

        let output = command
            .output()
            .map_err(|err| ProcessError::CantSpawn(cmd.to_string(), err))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            return Err(ProcessError::Failed {
                cmd: cmd.to_string(),
                code: output.status.code(),
                output: stdout,
            });
        }

        Ok(CmdOutput { stdout })
    }
}

/// Value of `$PATH` with system binaries placed before
/// anything the user has prepended.
fn prioritised_path() -> String {
    let system = SYSTEM_PATHS.join(":");

    match env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{}:{}", system, path),
        _ => system,
    }
}

/// Quotes a single argument for use in a shell command.
pub fn quote(arg: &str) -> Cow<'_, str> {
    // a NUL byte cannot be quoted and would be rejected at spawn anyway
    shlex::try_quote(arg).unwrap_or(Cow::Borrowed(arg))
}

/// Convenience function quoting a path for use in a shell command.
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy()).into_owned()
}

#[cfg(test)]
pub use fake::FakeProcessRunner;

#[cfg(test)]
mod fake {
    use super::{CmdOptions, CmdOutput, ProcessRunner};
    use crate::errors::ProcessError;
    use std::sync::Mutex;

    /// Runner recording commands instead of executing them.
    ///
    /// Commands containing one of the `failures` patterns exit with
    /// code 1 and the associated output. Commands containing one of the
    /// `responses` patterns succeed with the associated stdout.
    #[derive(Debug, Default)]
    pub struct FakeProcessRunner {
        pub calls: Mutex<Vec<(String, CmdOptions)>>,
        pub failures: Vec<(String, String)>,
        pub responses: Vec<(String, String)>,
    }

    impl FakeProcessRunner {
        pub fn new() -> Self {
            FakeProcessRunner::default()
        }

        pub fn fail_on(mut self, pattern: &str, output: &str) -> Self {
            self.failures.push((pattern.to_string(), output.to_string()));
            self
        }

        pub fn respond_to(mut self, pattern: &str, stdout: &str) -> Self {
            self.responses.push((pattern.to_string(), stdout.to_string()));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(cmd, _)| cmd.clone())
                .collect()
        }
    }

    impl ProcessRunner for FakeProcessRunner {
        fn run_cmd(&self, cmd: &str, options: &CmdOptions) -> Result<CmdOutput, ProcessError> {
            self.calls
                .lock()
                .unwrap()
                .push((cmd.to_string(), options.clone()));

            if let Some((_, output)) = self.failures.iter().find(|(p, _)| cmd.contains(p.as_str())) {
                return Err(ProcessError::Failed {
                    cmd: cmd.to_string(),
                    code: Some(1),
                    output: output.clone(),
                });
            }

            let stdout = self
                .responses
                .iter()
                .find(|(p, _)| cmd.contains(p.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();

            Ok(CmdOutput { stdout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{quote, CmdOptions, ProcessRunner, RealProcessRunner};
    use crate::errors::ProcessError;

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("with space"), "'with space'");
    }

    #[test]
    fn captured_output_includes_stderr() {
        let runner = RealProcessRunner::new(false);
        let out = runner
            .run_cmd("echo out; echo err >&2", &CmdOptions::new().capture())
            .unwrap();

        assert_eq!(out.stdout, "out\nerr\n");
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let runner = RealProcessRunner::new(false);
        let result = runner.run_cmd("echo broken; exit 3", &CmdOptions::new().capture());

        match result {
            Err(ProcessError::Failed { code, output, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(output, "broken\n");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn output_file_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.txt");
        let runner = RealProcessRunner::new(false);

        runner
            .run_cmd("pwd", &CmdOptions::new().cwd(dir.path()).output_file(&log))
            .unwrap();

        let written = std::fs::read_to_string(&log).unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(written.trim(), expected.to_string_lossy());
    }
}

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

//! Execution of batches of independent units of work
//! (fluxsite tasks and bitwise comparisons).
//!
//! Units can be run one after another on the current thread, or deployed
//! onto a fixed-size threadpool, one unit per job. Units only share the
//! [`Workspace`], so the order in which pooled units finish is arbitrary.
//!
//! Expected failures of external tools are handled by the units
//! themselves. An error returned from [`Runnable::run`] is a failure
//! of the whole batch: the serial executor stops at the first one,
//! while the pooled executor lets all deployed units finish and then
//! reports the first failure in submission order.

use super::workspace::Workspace;
use crate::errors::BenchError;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};
use rayon::ThreadPoolBuilder;
use std::sync::{mpsc, Arc};

/// Single unit of work that can be handed to an executor.
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, workspace: &Workspace) -> Result<(), BenchError>;
}

/// Runs `units` in order, stopping at the first error.
pub fn run_serially<T: Runnable>(units: &[T], workspace: &Workspace) -> Result<(), BenchError> {
    for unit in units {
        debug!("Running {}", unit.name());
        unit.run(workspace)?;
    }

    Ok(())
}

/// Runs `units` on a threadpool of `ncpus` threads.
///
/// All units are run even if some of them fail.
pub fn run_in_parallel<T: Runnable + 'static>(
    units: Vec<T>,
    workspace: &Workspace,
    ncpus: usize,
    label: &str,
) -> Result<(), BenchError> {
    debug!("Setting up ThreadPool with {} threads", ncpus);
    // a panicking unit drops its sender, which surfaces as WorkerLost
    let threadpool = ThreadPoolBuilder::new()
        .num_threads(ncpus)
        .panic_handler(|_| error!("A worker panicked while running a unit"))
        .build()?;

    let units_count = units.len();
    let units = Arc::new(units);

    // set progress bar for finished units
    let units_bar = ProgressBar::new(units_count as u64);
    units_bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );
    units_bar.set_prefix(label.to_string());

    let (tx, rx) = mpsc::channel();

    for index in 0..units_count {
        let tx = tx.clone();
        let units = Arc::clone(&units);
        let workspace = workspace.clone();

        threadpool.spawn(move || {
            let result = units[index].run(&workspace);
            // the receiver only stops listening when a worker is lost
            let _ = tx.send((index, result));
        });
    }

    drop(tx);

    let mut first_failure: Option<(usize, BenchError)> = None;

    for _ in 0..units_count {
        let (index, result) = rx.recv().map_err(|_| BenchError::WorkerLost)?;

        if let Err(err) = result {
            error!("{} failed with error: {}", units[index].name(), err);

            match &first_failure {
                Some((first, _)) if *first < index => {}
                _ => first_failure = Some((index, err)),
            }
        }

        units_bar.inc(1);
    }

    units_bar.finish_with_message("done");

    match first_failure {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{run_in_parallel, run_serially, Runnable};
    use crate::{
        benchmark::workspace::{Paths, Workspace},
        errors::BenchError,
        utils::process::FakeProcessRunner,
    };
    use std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    struct CountingUnit {
        name: String,
        runs: Arc<AtomicUsize>,
        fails: bool,
    }

    impl Runnable for CountingUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, _workspace: &Workspace) -> Result<(), BenchError> {
            self.runs.fetch_add(1, Ordering::SeqCst);

            if self.fails {
                return Err(BenchError::MissingBuildScript(PathBuf::from(&self.name)));
            }

            Ok(())
        }
    }

    fn units(count: usize, failing: &[usize]) -> (Vec<CountingUnit>, Vec<Arc<AtomicUsize>>) {
        let counters: Vec<_> = (0..count).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let units = counters
            .iter()
            .enumerate()
            .map(|(i, runs)| CountingUnit {
                name: format!("unit-{}", i),
                runs: Arc::clone(runs),
                fails: failing.contains(&i),
            })
            .collect();

        (units, counters)
    }

    fn workspace() -> Workspace {
        Workspace::new(Paths::new(Path::new(".")), Arc::new(FakeProcessRunner::new()))
    }

    #[test]
    fn serial_run_stops_at_first_failure() {
        let (units, counters) = units(5, &[2]);

        let result = run_serially(&units, &workspace());

        assert!(matches!(result, Err(BenchError::MissingBuildScript(p)) if p == Path::new("unit-2")));
        let runs: Vec<_> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(runs, vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn pool_runs_every_unit_once() {
        let (units, counters) = units(100, &[]);

        run_in_parallel(units, &workspace(), 4, "Units").unwrap();

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn pool_finishes_batch_and_reports_first_failure() {
        let (units, counters) = units(20, &[7, 3, 15]);

        let result = run_in_parallel(units, &workspace(), 4, "Units");

        assert!(matches!(result, Err(BenchError::MissingBuildScript(p)) if p == Path::new("unit-3")));
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    struct PanickingUnit;

    impl Runnable for PanickingUnit {
        fn name(&self) -> &str {
            "panicking"
        }

        fn run(&self, _workspace: &Workspace) -> Result<(), BenchError> {
            panic!("unit panicked");
        }
    }

    #[test]
    fn panicking_unit_is_reported_as_lost_worker() {
        let result = run_in_parallel(vec![PanickingUnit], &workspace(), 2, "Units");

        assert!(matches!(result, Err(BenchError::WorkerLost)));
    }

    #[test]
    fn empty_batches() {
        let (units, _) = units(0, &[]);
        assert!(run_serially(&units, &workspace()).is_ok());
        assert!(run_in_parallel(units, &workspace(), 2, "Units").is_ok());
    }
}

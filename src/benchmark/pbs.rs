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

//! PBS job script running the computationally expensive
//! fluxsite steps on compute nodes.

use super::configuration::Pbs;
use crate::constants::PBS_BASE_STORAGE;
use std::fmt::Write as _;

/// Values interpolated into the job script.
#[derive(Clone, Debug)]
pub struct JobScript<'a> {
    pub project: &'a str,
    pub config_path: &'a str,
    pub modules: &'a [String],
    pub benchcab_path: &'a str,
    pub pbs: &'a Pbs,
    pub verbose: bool,
    pub skip_bitwise_cmp: bool,
}

impl JobScript<'_> {
    pub fn render(&self) -> String {
        let verbose_flag = if self.verbose { " -v" } else { "" };

        let storage = PBS_BASE_STORAGE
            .iter()
            .map(|s| s.to_string())
            .chain(self.pbs.storage.iter().cloned())
            .collect::<Vec<_>>()
            .join("+");

        let mut script = String::new();

        let _ = writeln!(script, "#!/bin/bash");
        let _ = writeln!(script, "#PBS -l wd");
        let _ = writeln!(script, "#PBS -l ncpus={}", self.pbs.ncpus);
        let _ = writeln!(script, "#PBS -l mem={}", self.pbs.mem);
        let _ = writeln!(script, "#PBS -l walltime={}", self.pbs.walltime);
        let _ = writeln!(script, "#PBS -q normal");
        let _ = writeln!(script, "#PBS -P {}", self.project);
        let _ = writeln!(script, "#PBS -j oe");
        let _ = writeln!(script, "#PBS -m e");
        let _ = writeln!(script, "#PBS -l storage={}", storage);
        let _ = writeln!(script);

        let _ = writeln!(script, "module purge");
        for module in self.modules {
            let _ = writeln!(script, "module load {}", module);
        }
        let _ = writeln!(script);

        self.step(&mut script, "fluxsite-run-tasks", verbose_flag);

        if !self.skip_bitwise_cmp {
            let _ = writeln!(script);
            self.step(&mut script, "fluxsite-bitwise-cmp", verbose_flag);
        }

        script
    }

    fn step(&self, script: &mut String, command: &str, verbose_flag: &str) {
        let _ = writeln!(
            script,
            "{} {} --config={}{}",
            self.benchcab_path, command, self.config_path, verbose_flag
        );
        let _ = writeln!(script, "if [ $? -ne 0 ]; then");
        let _ = writeln!(
            script,
            "    echo 'Error: benchcab {} failed. Exiting...'",
            command
        );
        let _ = writeln!(script, "    exit 1");
        let _ = writeln!(script, "fi");
    }
}

#[cfg(test)]
mod tests {
    use super::JobScript;
    use crate::benchmark::configuration::Pbs;

    fn job_script<'a>(pbs: &'a Pbs, modules: &'a [String], skip: bool) -> JobScript<'a> {
        JobScript {
            project: "tm70",
            config_path: "/path/to/config.yaml",
            modules,
            benchcab_path: "/absolute/path/to/benchcab",
            pbs,
            verbose: false,
            skip_bitwise_cmp: skip,
        }
    }

    #[test]
    fn default_job_script() {
        let pbs = Pbs::default();
        let modules = vec!["foo".to_string(), "bar".to_string(), "baz".to_string()];

        let expected = "#!/bin/bash
#PBS -l wd
#PBS -l ncpus=18
#PBS -l mem=30GB
#PBS -l walltime=6:00:00
#PBS -q normal
#PBS -P tm70
#PBS -j oe
#PBS -m e
#PBS -l storage=gdata/ks32+gdata/hh5+gdata/wd9

module purge
module load foo
module load bar
module load baz

/absolute/path/to/benchcab fluxsite-run-tasks --config=/path/to/config.yaml
if [ $? -ne 0 ]; then
    echo 'Error: benchcab fluxsite-run-tasks failed. Exiting...'
    exit 1
fi

/absolute/path/to/benchcab fluxsite-bitwise-cmp --config=/path/to/config.yaml
if [ $? -ne 0 ]; then
    echo 'Error: benchcab fluxsite-bitwise-cmp failed. Exiting...'
    exit 1
fi
";

        assert_eq!(job_script(&pbs, &modules, false).render(), expected);
    }

    #[test]
    fn skipped_comparisons_and_extra_storage() {
        let pbs = Pbs {
            ncpus: 4,
            storage: vec!["scratch/tm70".to_string()],
            ..Pbs::default()
        };
        let mut script = job_script(&pbs, &[], true);
        script.verbose = true;

        let rendered = script.render();

        assert!(rendered.contains("#PBS -l ncpus=4\n"));
        assert!(rendered.contains("#PBS -l storage=gdata/ks32+gdata/hh5+gdata/wd9+scratch/tm70\n"));
        assert!(rendered.contains("fluxsite-run-tasks --config=/path/to/config.yaml -v\n"));
        assert!(!rendered.contains("fluxsite-bitwise-cmp"));
    }
}

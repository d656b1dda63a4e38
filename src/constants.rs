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

//! Module containing constants used by benchcab.
//!
//! File names, default directory layout, default PBS resources,
//! and the lists of FLUXNET sites making up each experiment
//! on modelevaluation.org.

/// Name of the PBS job script written by `fluxsite-submit-job`.
pub const QSUB_FNAME: &str = "benchmark_cable_qsub.sh";

/// Default PBS resources for the fluxsite job.
pub const DEFAULT_PBS_NCPUS: usize = 18;
pub const DEFAULT_PBS_MEM: &str = "30GB";
pub const DEFAULT_PBS_WALLTIME: &str = "6:00:00";

/// Storage flags always requested by the PBS job.
pub const PBS_BASE_STORAGE: [&str; 3] = ["gdata/ks32", "gdata/hh5", "gdata/wd9"];

pub const DEFAULT_MULTIPROCESS: bool = true;

/// Default system paths in Unix, prioritised over user-defined `$PATH`.
pub const SYSTEM_PATHS: [&str; 3] = ["/bin", "/usr/bin", "/usr/local/bin"];

/// Groups the user must belong to (in addition to the project).
pub const REQUIRED_GROUPS: [&str; 2] = ["ks32", "hh5"];

/// Substring identifying Gadi compute and login nodes.
pub const GADI_NODENAME: &str = "gadi.nci";

/// Environment modules initialisation script for bash.
pub const MODULES_INIT: &str = "/opt/Modules/v4.3.0/init/bash";

/// Module providing `nccmp`, used for bitwise comparisons.
pub const NCCMP_MODULE: &str = "nccmp/1.8.5.0";

/// Module providing `ncatted`, used for adding provenance to outputs.
pub const NCO_MODULE: &str = "nco/5.0.5";

pub const SRC_DIR: &str = "src";
pub const RUN_DIR: &str = "runs";
pub const NAMELIST_DIR: &str = "namelists";

/// Path to the PLUMBER2 site forcing data directory (doi: 10.25914/5fdb0902607e1).
pub const MET_DIR: &str = "/g/data/ks32/CLEX_Data/PLUMBER2/v1-0/Met/";

pub const CABLE_AUX_DIR: &str = "/g/data/wd9/BenchMarking/CABLE-AUX_v20240122";

/// CABLE grid info file, relative to [`CABLE_AUX_DIR`].
pub const GRID_FILE: &str = "offline/gridinfo_CSIRO_1x1.nc";

pub const CABLE_SVN_ROOT: &str = "https://trac.nci.org.au/svn/cable";
pub const CABLE_GIT_URL: &str = "https://github.com/CABLE-LSM/CABLE.git";

/// Temporary build directories relative to the model source directory.
pub const TMP_BUILD_DIR: &str = "offline/.tmp";
pub const TMP_BUILD_DIR_MPI: &str = "offline/.mpitmp";

pub const CABLE_EXE: &str = "cable";
pub const CABLE_MPI_EXE: &str = "cable-mpi";
pub const CABLE_NML: &str = "cable.nml";
pub const CABLE_VEGETATION_NML: &str = "pft_params.nml";
pub const CABLE_SOIL_NML: &str = "cable_soilparm.nml";
pub const CABLE_STDOUT_FILENAME: &str = "out.txt";
pub const CABLE_FIXED_CO2_CONC: f64 = 400.0;

/// Fortran sources copied into the temporary build directory.
/// Each entry is a directory and the file name suffix to match.
pub const OFFLINE_SOURCE_FILES: [(&str, &str); 14] = [
    ("science/albedo", "90"),
    ("science/radiation", "90"),
    ("science/canopy", "90"),
    ("science/casa-cnp", "90"),
    ("science/gw_hydro", "90"),
    ("science/misc", "90"),
    ("science/roughness", "90"),
    ("science/soilsnow", "90"),
    ("science/landuse", "90"),
    ("offline", "90"),
    ("util", "90"),
    ("params", "90"),
    ("science/sli", "90"),
    ("science/pop", "90"),
];

/// Default spatial met forcings, each with a payu experiment
/// configured to run CABLE with that forcing.
pub const SPATIAL_DEFAULT_MET_FORCINGS: [(&str, &str); 1] = [(
    "crujra_access",
    "https://github.com/CABLE-LSM/cable_example.git",
)];

pub const FIVE_SITE_TEST: &str = "five-site-test";
pub const FORTY_TWO_SITE_TEST: &str = "forty-two-site-test";
pub const DEFAULT_EXPERIMENT: &str = FORTY_TWO_SITE_TEST;

/// FLUXNET site ids of the 'Five site test' experiment.
pub const FIVE_SITE_IDS: [&str; 5] = ["AU-Tum", "AU-How", "FI-Hyy", "US-Var", "US-Whs"];

/// FLUXNET site ids of the 'Forty two site test' experiment.
pub const FORTY_TWO_SITE_IDS: [&str; 42] = [
    "AU-Tum", "AU-How", "AU-Cum", "AU-ASM", "AU-GWW", "AU-Ctr", "AU-Stp", "BR-Sa3", "CA-Qfo",
    "CH-Dav", "CN-Cha", "CN-Din", "DE-Geb", "DE-Gri", "DE-Hai", "DE-Tha", "DK-Sor", "FI-Hyy",
    "FR-Gri", "FR-Pue", "GF-Guy", "IT-Lav", "IT-MBo", "IT-Noe", "NL-Loo", "RU-Fyo", "US-Blo",
    "US-GLE", "US-Ha1", "US-Me2", "US-MMS", "US-Myb", "US-NR1", "US-PFa", "US-FPe", "US-SRM",
    "US-SRG", "US-Ton", "US-UMB", "US-Var", "US-Whs", "US-Wkg",
];

/// Returns site ids of the named experiment.
pub fn experiment_site_ids(experiment: &str) -> Option<&'static [&'static str]> {
    match experiment {
        FIVE_SITE_TEST => Some(&FIVE_SITE_IDS),
        FORTY_TWO_SITE_TEST => Some(&FORTY_TWO_SITE_IDS),
        _ => None,
    }
}


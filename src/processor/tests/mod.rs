//! Batch processor tests over temporary directories of instrument files.

pub mod batch_processing;

use std::fs;
use std::path::{Path, PathBuf};

pub const RTEXT: &str = concat!(
    "Model=RBRsolo\n",
    "Serial=077014\n",
    "NumberOfSamples=3\n",
    "\n",
    "Date & Time               Temperature\n",
    "2019-05-01 00:00:00.000   10.1234\n",
    "2019-05-01 00:00:10.000   10.2234\n",
    "2019-05-01 00:00:20.000   10.3234\n",
);

pub const CNV: &str = concat!(
    "* Sea-Bird SBE 9 Data File:\n",
    "* System UTC = Jun 23 2016 13:51:30\n",
    "# nquan = 2\n",
    "# nvalues = 2\n",
    "# name 0 = prdM: Pressure, Strain Gauge [db]\n",
    "# name 1 = tv290C: Temperature [ITS-90, deg C]\n",
    "# bad_flag = -9.990e-29\n",
    "*END*\n",
    "      1.000     10.1234\n",
    "      2.000     10.0234\n",
);

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::Error;

/// MRAM (main DPU memory) capacity, in bytes.
pub const MRAM_SIZE: usize = 64 << 20;

/// WRAM (working memory) capacity, in bytes.
pub const WRAM_SIZE: usize = 64 << 10;

/// Hardware threads per DPU.
pub const MAX_TASKLETS: usize = 24;

/// Describes the pool of simulated DPUs.
///
/// constructed programmatically or read from a config file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatorConfiguration {
    pub nr_ranks: usize,
    pub dpus_per_rank: usize,
    pub mram_size: usize, // in bytes
    pub wram_size: usize, // in bytes
    pub max_tasklets: usize,
    pub allocate_all_supported: bool,
}

impl SimulatorConfiguration {
    pub fn nr_dpus(&self) -> usize {
        self.nr_ranks * self.dpus_per_rank
    }

    pub fn from_file(file_name: &Path) -> Result<Self, Error> {
        let file = File::open(file_name).map_err(|e| {
            Error::InvalidConfig(format!("cannot open {}: {}", file_name.display(), e))
        })?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", file_name.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(config: &str) -> Result<Self, Error> {
        let config: Self =
            serde_yaml::from_str(config).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.nr_ranks == 0 || self.dpus_per_rank == 0 {
            return Err(Error::InvalidConfig(
                "the simulator needs at least one DPU".to_string(),
            ));
        }
        if self.max_tasklets == 0 {
            return Err(Error::InvalidConfig(
                "max_tasklets must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulatorConfiguration {
    fn default() -> Self {
        Self {
            nr_ranks: 1,
            dpus_per_rank: 64,
            mram_size: MRAM_SIZE,
            wram_size: WRAM_SIZE,
            max_tasklets: MAX_TASKLETS,
            allocate_all_supported: true,
        }
    }
}

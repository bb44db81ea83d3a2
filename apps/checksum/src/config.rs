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

use anyhow::Context;
use dpu_platform::{Error, PullStrategy, DEFAULT_BUFFER_SIZE, MAX_EXACT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Image loaded when no other binary is given.
pub const DEFAULT_BINARY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/dpu/checksum_dpu.yaml");

/// Parameters of a checksum run.
///
/// Can be constructed programmatically or read from a YAML file; missing
/// fields take their default value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// DPU program image.
    pub binary_path: PathBuf,
    pub buffer_size: usize, // in bytes
    /// Seed of the workload generator.
    pub seed: u64,
    pub pull_strategy: PullStrategy,
    /// Number of times the whole pipeline runs. Iteration `i` uses
    /// `seed + i`.
    pub iterations: usize,
    /// Take DPUs that failed an iteration out of the pool.
    pub disable_failing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from(DEFAULT_BINARY),
            buffer_size: DEFAULT_BUFFER_SIZE,
            seed: 0,
            pull_strategy: PullStrategy::default(),
            iterations: 1,
            disable_failing: false,
        }
    }
}

impl Config {
    pub fn from_file(file_name: &Path) -> anyhow::Result<Self> {
        let file = File::open(file_name)
            .with_context(|| format!("cannot open config {}", file_name.display()))?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse config {}", file_name.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the parameters before anything is allocated.
    pub fn validate(&self) -> Result<(), Error> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "buffer_size must be at least 1 byte".to_string(),
            ));
        }
        // larger buffers may overflow the DPU's 32-bit accumulator
        if self.buffer_size > MAX_EXACT_BUFFER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "buffer_size {} exceeds {} bytes",
                self.buffer_size, MAX_EXACT_BUFFER_SIZE
            )));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

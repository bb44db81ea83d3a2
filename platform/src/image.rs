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

//! Program images installed on DPUs.
//!
//! An image names the kernel it runs, its tasklet count, and the symbol
//! table of memory regions the host may address by name.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::reduce::RECORD_SIZE;
use crate::Error;

/// Input buffer in MRAM, written by the host before execution.
pub const DPU_BUFFER: &str = "dpu_mram_buffer";

/// Per-tasklet result records in WRAM, read by the host after execution.
pub const DPU_RESULTS: &str = "dpu_wram_results";

/// Optional little-endian u32 holding the number of valid input bytes.
pub const DPU_INPUT_SIZE: &str = "dpu_input_size";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum MemoryKind {
    Mram,
    Wram,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SymbolSpec {
    pub name: String,
    pub kind: MemoryKind,
    pub size: usize, // in bytes
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProgramImage {
    pub name: String,
    /// Name under which the runtime registered the kernel to execute.
    pub kernel: String,
    pub nr_tasklets: usize,
    #[serde(default)]
    pub symbols: Vec<SymbolSpec>,
}

impl ProgramImage {
    pub fn new(name: &str, kernel: &str, nr_tasklets: usize) -> Self {
        Self {
            name: name.to_string(),
            kernel: kernel.to_string(),
            nr_tasklets,
            symbols: Vec::new(),
        }
    }

    pub fn with_symbol(mut self, name: &str, kind: MemoryKind, size: usize) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_string(),
            kind,
            size,
        });
        self
    }

    /// The checksum program: an input buffer of `buffer_size` bytes, the
    /// input size word, and one result record per tasklet.
    pub fn checksum(nr_tasklets: usize, buffer_size: usize) -> Self {
        Self::new("checksum_dpu", "checksum", nr_tasklets)
            .with_symbol(DPU_BUFFER, MemoryKind::Mram, buffer_size)
            .with_symbol(DPU_INPUT_SIZE, MemoryKind::Wram, 4)
            .with_symbol(DPU_RESULTS, MemoryKind::Wram, nr_tasklets * RECORD_SIZE)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let load_error = |reason: String| Error::Load {
            image: path.display().to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
        serde_yaml::from_reader(BufReader::new(file)).map_err(|e| load_error(e.to_string()))
    }

    pub fn from_str(image: &str) -> Result<Self, Error> {
        serde_yaml::from_str(image).map_err(|e| Error::Load {
            image: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolSpec> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Total bytes the image reserves in memory of the given kind.
    pub fn footprint(&self, kind: MemoryKind) -> usize {
        self.symbols
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.size)
            .sum()
    }

    /// Checks that the image fits a DPU with the given capacities.
    pub fn validate(
        &self,
        mram_size: usize,
        wram_size: usize,
        max_tasklets: usize,
    ) -> Result<(), Error> {
        let reject = |reason: String| {
            Err(Error::Load {
                image: self.name.clone(),
                reason,
            })
        };
        if self.nr_tasklets == 0 || self.nr_tasklets > max_tasklets {
            return reject(format!(
                "{} tasklets requested, the DPU supports 1 to {}",
                self.nr_tasklets, max_tasklets
            ));
        }
        let mut names = HashSet::new();
        if let Some(dup) = self.symbols.iter().find(|s| !names.insert(s.name.as_str())) {
            return reject(format!("duplicate symbol {}", dup.name));
        }
        for (kind, capacity) in [(MemoryKind::Mram, mram_size), (MemoryKind::Wram, wram_size)] {
            let footprint = self.footprint(kind);
            if footprint > capacity {
                return reject(format!(
                    "{:?} footprint of {} bytes exceeds the {} bytes available",
                    kind, footprint, capacity
                ));
            }
        }
        Ok(())
    }
}

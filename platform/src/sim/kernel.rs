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

//! Programs executed by simulated DPUs.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::reduce::{PartialResult, RECORD_SIZE};
use crate::{MemoryKind, ProgramImage, DPU_BUFFER, DPU_INPUT_SIZE, DPU_RESULTS};

/// Size of the MRAM blocks the checksum kernel streams through its cache.
pub const BLOCK_SIZE: usize = 2048;

/// Cost of setting up one MRAM -> WRAM DMA.
const DMA_SETUP_CYCLES: u64 = 64;

/// Cost of loading and accumulating one cached byte.
const CYCLES_PER_BYTE: u64 = 4;

struct Region {
    kind: MemoryKind,
    bytes: Vec<u8>,
}

/// The symbol-addressed memory of one DPU, laid out from a program image.
pub struct DpuMemory {
    regions: HashMap<String, Region>,
}

impl DpuMemory {
    pub(crate) fn new(image: &ProgramImage) -> Self {
        Self {
            regions: image
                .symbols
                .iter()
                .map(|s| {
                    (
                        s.name.clone(),
                        Region {
                            kind: s.kind,
                            bytes: vec![0u8; s.size],
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn size(&self, symbol: &str) -> Option<usize> {
        self.regions.get(symbol).map(|r| r.bytes.len())
    }

    pub fn kind(&self, symbol: &str) -> Option<MemoryKind> {
        self.regions.get(symbol).map(|r| r.kind)
    }

    pub fn read(&self, symbol: &str, offset: usize, len: usize) -> Result<&[u8], String> {
        let region = self
            .regions
            .get(symbol)
            .ok_or_else(|| format!("unknown symbol {}", symbol))?;
        let range = checked_range(offset, len, region.bytes.len(), symbol)?;
        Ok(&region.bytes[range])
    }

    pub fn write(&mut self, symbol: &str, offset: usize, data: &[u8]) -> Result<(), String> {
        let region = self
            .regions
            .get_mut(symbol)
            .ok_or_else(|| format!("unknown symbol {}", symbol))?;
        let range = checked_range(offset, data.len(), region.bytes.len(), symbol)?;
        region.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Flips one bit, addressed from the start of `symbol`.
    pub(crate) fn flip_bit(&mut self, symbol: &str, bit: usize) {
        if let Some(byte) = self
            .regions
            .get_mut(symbol)
            .and_then(|r| r.bytes.get_mut(bit / 8))
        {
            *byte ^= 1 << (bit % 8);
        }
    }
}

fn checked_range(
    offset: usize,
    len: usize,
    size: usize,
    symbol: &str,
) -> Result<std::ops::Range<usize>, String> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(format!(
            "access [{}, {}+{}) out of bounds of {} ({} bytes)",
            offset, offset, len, symbol, size
        )),
    }
}

/// Execution context of one tasklet: its identity, the DPU memory, the
/// DPU log and the tasklet's cycle counter.
pub struct Tasklet<'a> {
    id: usize,
    nr_tasklets: usize,
    memory: &'a mut DpuMemory,
    log: &'a mut String,
    cycles: u64,
}

impl<'a> Tasklet<'a> {
    pub(crate) fn new(
        id: usize,
        nr_tasklets: usize,
        memory: &'a mut DpuMemory,
        log: &'a mut String,
    ) -> Self {
        Self {
            id,
            nr_tasklets,
            memory,
            log,
            cycles: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn nr_tasklets(&self) -> usize {
        self.nr_tasklets
    }

    pub fn region_size(&self, symbol: &str) -> Option<usize> {
        self.memory.size(symbol)
    }

    pub fn read(&self, symbol: &str, offset: usize, len: usize) -> Result<&[u8], String> {
        self.memory.read(symbol, offset, len)
    }

    pub fn write(&mut self, symbol: &str, offset: usize, data: &[u8]) -> Result<(), String> {
        self.memory.write(symbol, offset, data)
    }

    /// Advances the cycle counter.
    pub fn charge(&mut self, cycles: u64) {
        self.cycles += cycles;
    }

    pub fn perfcounter(&self) -> u64 {
        self.cycles
    }

    pub fn log(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }
}

/// A program a simulated DPU can execute. The simulator runs each tasklet
/// to completion; an `Err` faults the whole DPU.
pub trait Kernel: Debug {
    fn run_tasklet(&self, tasklet: &mut Tasklet<'_>) -> Result<(), String>;
}

/// Sums the input buffer, one record per tasklet.
///
/// Tasklets rake through the input: block `b` (of `BLOCK_SIZE` bytes) is
/// handled by tasklet `b % nr_tasklets`. The input length comes from the
/// `dpu_input_size` word when the image declares it, otherwise it is the
/// whole buffer region.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumKernel;

impl Kernel for ChecksumKernel {
    fn run_tasklet(&self, tasklet: &mut Tasklet<'_>) -> Result<(), String> {
        let input_size = match tasklet.region_size(DPU_INPUT_SIZE) {
            Some(_) => {
                let word = tasklet.read(DPU_INPUT_SIZE, 0, 4)?;
                u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as usize
            }
            None => tasklet
                .region_size(DPU_BUFFER)
                .ok_or_else(|| format!("missing symbol {}", DPU_BUFFER))?,
        };
        let nb_blocks = (input_size + BLOCK_SIZE - 1) / BLOCK_SIZE;

        let mut checksum = 0u32;
        for block in (tasklet.id()..nb_blocks).step_by(tasklet.nr_tasklets()) {
            let start = block * BLOCK_SIZE;
            let len = BLOCK_SIZE.min(input_size - start);
            let cache = tasklet.read(DPU_BUFFER, start, len)?;
            checksum = cache
                .iter()
                .fold(checksum, |acc, b| acc.wrapping_add(*b as u32));
            tasklet.charge(DMA_SETUP_CYCLES + CYCLES_PER_BYTE * len as u64);
        }

        // keep the 32-bit LSB of the 64-bit cycle counter
        let result = PartialResult::new(checksum, tasklet.perfcounter() as u32);
        let offset = tasklet.id() * RECORD_SIZE;
        tasklet.write(DPU_RESULTS, offset, &result.to_le_bytes())?;
        let line = format!("[{:02}] Checksum = 0x{:08x}", tasklet.id(), checksum);
        tasklet.log(&line);
        Ok(())
    }
}

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

//! A functional simulator of a pool of DPUs.
//!
//! The simulator implements `DpuRuntime` on host memory: each DPU holds the
//! regions declared by its program image, and a launch runs the image's
//! kernel once per tasklet. Failures can be injected to exercise the
//! orchestration's error paths.

use rand::{Rng, SeedableRng};
use rand_core::RngCore;
use rand_xoshiro::Xoshiro256StarStar;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

mod kernel;
pub use kernel::{ChecksumKernel, DpuMemory, Kernel, Tasklet, BLOCK_SIZE};

use crate::reduce::{PartialResult, RECORD_SIZE};
use crate::{
    DpuId, DpuRuntime, Error, MemoryKind, NrDpus, ProgramImage, SimulatorConfiguration,
    DPU_RESULTS,
};

/// Characteristics of the failures we inject into the simulation.
///
/// DPUs are identified by their index in the simulated pool.
pub struct FailureProperties {
    /// Maps a DPU to the symbol whose transfers fail on that DPU.
    pub transfer_faults: HashMap<usize, String>,

    /// DPUs that fault as soon as they are launched.
    pub induced_faults: HashSet<usize>,

    /// Maps a DPU to the tasklet whose checksum is off by one once the
    /// DPU completes.
    pub corrupted_results: HashMap<usize, usize>,

    /// Probability a write to MRAM has one bit flipped.
    pub mram_bit_flip_rate: f64,

    /// Random number generator used to calculate probabilities.
    /// Note: the RNG provided by the Default implementation is deterministic.
    pub rng: Box<dyn RngCore>,
}

impl Default for FailureProperties {
    /// No failures. Note the RNG provided by the Default implementation is
    /// deterministic.
    fn default() -> Self {
        Self {
            transfer_faults: HashMap::new(),
            induced_faults: HashSet::new(),
            corrupted_results: HashMap::new(),
            mram_bit_flip_rate: 0.0,
            rng: Box::new(Xoshiro256StarStar::seed_from_u64(0x87654321FEDCBA09u64)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DpuState {
    Idle,
    Loaded,
    Done,
    Faulted(String),
}

/// Counters the tests use to check the pool is handled correctly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Successful allocation requests.
    pub allocations: usize,
    /// Release requests.
    pub releases: usize,
    /// DPUs returned to the pool, over all releases.
    pub released_dpus: usize,
    pub launches: usize,
}

struct LoadedProgram {
    image: ProgramImage,
    kernel: Rc<dyn Kernel>,
    memory: DpuMemory,
}

struct SimDpu {
    id: DpuId,
    allocated: bool,
    disabled: bool,
    program: Option<LoadedProgram>,
    log: String,
    state: DpuState,
}

impl SimDpu {
    fn new(id: DpuId) -> Self {
        Self {
            id,
            allocated: false,
            disabled: false,
            program: None,
            log: String::new(),
            state: DpuState::Idle,
        }
    }

    fn reset(&mut self) {
        self.program = None;
        self.log.clear();
        self.state = DpuState::Idle;
    }
}

pub struct SimulatedRuntime {
    config: SimulatorConfiguration,
    dpus: Vec<SimDpu>,
    kernels: HashMap<String, Rc<dyn Kernel>>,
    failures: FailureProperties,
    stats: RuntimeStats,
}

impl SimulatedRuntime {
    pub fn new(config: SimulatorConfiguration) -> Self {
        Self::with_failures(config, FailureProperties::default())
    }

    pub fn with_failures(config: SimulatorConfiguration, failures: FailureProperties) -> Self {
        let dpus = (0..config.nr_dpus())
            .map(|index| SimDpu::new(DpuId::from_index(index, config.dpus_per_rank)))
            .collect();
        let mut kernels: HashMap<String, Rc<dyn Kernel>> = HashMap::new();
        kernels.insert("checksum".to_string(), Rc::new(ChecksumKernel));
        Self {
            config,
            dpus,
            kernels,
            failures,
            stats: RuntimeStats::default(),
        }
    }

    /// Makes `kernel` loadable by images naming it.
    pub fn register_kernel<K: Kernel + 'static>(&mut self, name: &str, kernel: K) {
        self.kernels.insert(name.to_string(), Rc::new(kernel));
    }

    pub fn config(&self) -> &SimulatorConfiguration {
        &self.config
    }

    pub fn failures_mut(&mut self) -> &mut FailureProperties {
        &mut self.failures
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    /// Number of DPUs currently allocated.
    pub fn allocated(&self) -> usize {
        self.dpus.iter().filter(|d| d.allocated).count()
    }

    pub fn disabled(&self) -> Vec<DpuId> {
        self.dpus
            .iter()
            .filter(|d| d.disabled)
            .map(|d| d.id)
            .collect()
    }

    pub fn state(&self, dpu: DpuId) -> Option<&DpuState> {
        self.pool_index(dpu).ok().map(|index| &self.dpus[index].state)
    }

    fn pool_index(&self, dpu: DpuId) -> Result<usize, Error> {
        let index = dpu.index(self.config.dpus_per_rank);
        match self.dpus.get(index) {
            Some(sim) if sim.id == dpu => Ok(index),
            _ => Err(Error::InvalidDpu(dpu)),
        }
    }

    /// Index of an allocated DPU.
    fn allocated_index(&self, dpu: DpuId) -> Result<usize, Error> {
        let index = self.pool_index(dpu)?;
        if !self.dpus[index].allocated {
            return Err(Error::InvalidDpu(dpu));
        }
        Ok(index)
    }

    fn check_transfer(&self, index: usize, symbol: &str) -> Result<(), Error> {
        let sim = &self.dpus[index];
        let transfer_error = |reason: &str| Error::Transfer {
            dpu: sim.id,
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        };
        if self.failures.transfer_faults.get(&index).map(String::as_str) == Some(symbol) {
            return Err(transfer_error("injected bus fault"));
        }
        if sim.program.is_none() {
            return Err(transfer_error("no program loaded"));
        }
        Ok(())
    }

    fn execute(&mut self, dpu: DpuId) -> Result<(), Error> {
        let index = self.allocated_index(dpu)?;
        let fault = |reason: String| Error::ExecutionFault { dpu, reason };
        let induced = self.failures.induced_faults.contains(&index);
        let corrupted = self.failures.corrupted_results.get(&index).copied();

        let sim = &mut self.dpus[index];
        sim.log.clear();
        let program = match sim.program.as_mut() {
            Some(program) => program,
            None => {
                sim.state = DpuState::Faulted("no program loaded".to_string());
                return Err(fault("no program loaded".to_string()));
            }
        };
        if induced {
            sim.state = DpuState::Faulted("induced fault".to_string());
            return Err(fault("induced fault".to_string()));
        }

        let kernel = Rc::clone(&program.kernel);
        let nr_tasklets = program.image.nr_tasklets;
        for id in 0..nr_tasklets {
            let mut tasklet = Tasklet::new(id, nr_tasklets, &mut program.memory, &mut sim.log);
            if let Err(reason) = kernel.run_tasklet(&mut tasklet) {
                let reason = format!("tasklet {}: {}", id, reason);
                sim.state = DpuState::Faulted(reason.clone());
                return Err(fault(reason));
            }
        }

        if let Some(tasklet) = corrupted {
            let offset = tasklet * RECORD_SIZE;
            let record = program
                .memory
                .read(DPU_RESULTS, offset, RECORD_SIZE)
                .map(|bytes| {
                    let mut record = [0u8; RECORD_SIZE];
                    record.copy_from_slice(bytes);
                    record
                });
            match record {
                Ok(record) => {
                    let mut result = PartialResult::from_le_bytes(record);
                    result.checksum = result.checksum.wrapping_add(1);
                    program
                        .memory
                        .write(DPU_RESULTS, offset, &result.to_le_bytes())
                        .map_err(fault)?;
                    log::trace!("corrupted record of tasklet {} on DPU {}", tasklet, dpu);
                }
                Err(e) => log::warn!("cannot corrupt DPU {} results: {}", dpu, e),
            }
        }
        sim.state = DpuState::Done;
        Ok(())
    }
}

impl DpuRuntime for SimulatedRuntime {
    fn available(&self) -> usize {
        self.dpus
            .iter()
            .filter(|d| !d.allocated && !d.disabled)
            .count()
    }

    fn supports_allocate_all(&self) -> bool {
        self.config.allocate_all_supported
    }

    fn allocate(&mut self, count: usize) -> Result<Vec<DpuId>, Error> {
        let free = self
            .dpus
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.allocated && !d.disabled)
            .map(|(index, _)| index)
            .take(count)
            .collect::<Vec<_>>();
        if free.len() < count {
            return Err(Error::Allocation {
                requested: NrDpus::Count(count),
                available: free.len(),
            });
        }
        self.stats.allocations += 1;
        Ok(free
            .into_iter()
            .map(|index| {
                let sim = &mut self.dpus[index];
                sim.allocated = true;
                sim.reset();
                sim.id
            })
            .collect())
    }

    fn release(&mut self, dpus: &[DpuId]) {
        self.stats.releases += 1;
        for dpu in dpus {
            if let Ok(index) = self.allocated_index(*dpu) {
                let sim = &mut self.dpus[index];
                sim.allocated = false;
                sim.reset();
                self.stats.released_dpus += 1;
            }
        }
    }

    fn load(&mut self, dpu: DpuId, image: &ProgramImage) -> Result<(), Error> {
        let index = self.allocated_index(dpu)?;
        image.validate(
            self.config.mram_size,
            self.config.wram_size,
            self.config.max_tasklets,
        )?;
        let kernel = self.kernels.get(&image.kernel).cloned().ok_or_else(|| Error::Load {
            image: image.name.clone(),
            reason: format!("unknown kernel {}", image.kernel),
        })?;
        let sim = &mut self.dpus[index];
        sim.reset();
        sim.program = Some(LoadedProgram {
            image: image.clone(),
            kernel,
            memory: DpuMemory::new(image),
        });
        sim.state = DpuState::Loaded;
        Ok(())
    }

    fn symbol_size(&self, dpu: DpuId, symbol: &str) -> Result<usize, Error> {
        let index = self.allocated_index(dpu)?;
        self.dpus[index]
            .program
            .as_ref()
            .and_then(|p| p.memory.size(symbol))
            .ok_or_else(|| Error::Transfer {
                dpu,
                symbol: symbol.to_string(),
                reason: "unknown symbol".to_string(),
            })
    }

    fn copy_to(
        &mut self,
        dpu: DpuId,
        symbol: &str,
        offset: usize,
        data: &[u8],
    ) -> Result<(), Error> {
        let index = self.allocated_index(dpu)?;
        self.check_transfer(index, symbol)?;
        let memory = match self.dpus[index].program.as_mut() {
            Some(program) => &mut program.memory,
            None => return Err(Error::InvalidDpu(dpu)),
        };
        memory
            .write(symbol, offset, data)
            .map_err(|reason| Error::Transfer {
                dpu,
                symbol: symbol.to_string(),
                reason,
            })?;

        let rate = self.failures.mram_bit_flip_rate.clamp(0.0, 1.0);
        if memory.kind(symbol) == Some(MemoryKind::Mram)
            && !data.is_empty()
            && rate > 0.0
            && self.failures.rng.gen_bool(rate)
        {
            let bit = offset * 8 + self.failures.rng.gen_range(0..data.len() * 8);
            log::trace!("flipping MRAM bit {} of {} on DPU {}", bit, symbol, dpu);
            memory.flip_bit(symbol, bit);
        }
        Ok(())
    }

    fn copy_from(
        &mut self,
        dpu: DpuId,
        symbol: &str,
        offset: usize,
        dest: &mut [u8],
    ) -> Result<(), Error> {
        let index = self.allocated_index(dpu)?;
        self.check_transfer(index, symbol)?;
        let memory = match self.dpus[index].program.as_ref() {
            Some(program) => &program.memory,
            None => return Err(Error::InvalidDpu(dpu)),
        };
        let bytes = memory
            .read(symbol, offset, dest.len())
            .map_err(|reason| Error::Transfer {
                dpu,
                symbol: symbol.to_string(),
                reason,
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    fn launch(&mut self, dpus: &[DpuId]) -> Vec<Result<(), Error>> {
        self.stats.launches += 1;
        dpus.iter().map(|dpu| self.execute(*dpu)).collect()
    }

    fn read_log(&self, dpu: DpuId) -> Result<String, Error> {
        let index = self.allocated_index(dpu)?;
        Ok(self.dpus[index].log.clone())
    }

    fn disable(&mut self, dpu: DpuId) -> Result<(), Error> {
        let index = self.pool_index(dpu)?;
        let sim = &mut self.dpus[index];
        if sim.allocated {
            // only free DPUs can be taken out of the pool
            return Err(Error::InvalidDpu(dpu));
        }
        log::info!("disabling DPU {}", dpu);
        sim.disabled = true;
        Ok(())
    }
}

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

mod config;
mod device;
mod error;
mod exec;
mod image;
mod reduce;
mod runtime;
mod sim;
mod transfer;
mod verify;
mod workload;

// Public types
pub use crate::config::SimulatorConfiguration;
pub use crate::config::{MAX_TASKLETS, MRAM_SIZE, WRAM_SIZE};
pub use crate::device::DeviceSet;
pub use crate::error::Error;
pub use crate::image::{MemoryKind, ProgramImage, SymbolSpec};
pub use crate::image::{DPU_BUFFER, DPU_INPUT_SIZE, DPU_RESULTS};
pub use crate::reduce::{decode_records, fetch_records, reduce, region_size};
pub use crate::reduce::{PartialResult, ReducedResult, RECORD_SIZE};
pub use crate::runtime::{DpuId, DpuRuntime, NrDpus, ALLOCATE_ALL, DPUS_PER_SLICE};
pub use crate::sim::{ChecksumKernel, DpuMemory, Kernel, Tasklet, BLOCK_SIZE};
pub use crate::sim::{DpuState, FailureProperties, RuntimeStats, SimulatedRuntime};
pub use crate::transfer::{PullStrategy, TransferBatch};
pub use crate::verify::{verify, DpuReport, DpuStatus, RunReport, EX_SOFTWARE};
pub use crate::workload::{Checksum, Workload, DEFAULT_BUFFER_SIZE, MAX_EXACT_BUFFER_SIZE};

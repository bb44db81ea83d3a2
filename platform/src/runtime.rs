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

//! The boundary between the host orchestration and the DPU hardware.
//!
//! Everything above this trait (device sets, transfers, reduction) is
//! expressed in terms of `DpuRuntime`, so the same orchestration runs against
//! real hardware bindings or the functional simulator in `crate::sim`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, ProgramImage};

/// Number of DPUs grouped in a slice (control interface) of a rank.
pub const DPUS_PER_SLICE: usize = 8;

/// Physical location of a DPU: rank, slice within the rank, member within
/// the slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct DpuId {
    pub rank: u32,
    pub slice: u32,
    pub member: u32,
}

impl DpuId {
    pub fn new(rank: u32, slice: u32, member: u32) -> Self {
        Self {
            rank,
            slice,
            member,
        }
    }

    /// Location of the `index`-th DPU of a pool made of ranks holding
    /// `dpus_per_rank` DPUs each.
    pub fn from_index(index: usize, dpus_per_rank: usize) -> Self {
        let in_rank = index % dpus_per_rank;
        Self {
            rank: (index / dpus_per_rank) as u32,
            slice: (in_rank / DPUS_PER_SLICE) as u32,
            member: (in_rank % DPUS_PER_SLICE) as u32,
        }
    }

    /// Inverse of `from_index`.
    pub fn index(&self, dpus_per_rank: usize) -> usize {
        self.rank as usize * dpus_per_rank
            + self.slice as usize * DPUS_PER_SLICE
            + self.member as usize
    }
}

impl fmt::Display for DpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.rank, self.slice, self.member)
    }
}

/// How many DPUs to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NrDpus {
    Count(usize),
    /// Every DPU the runtime can currently provide.
    All,
}

pub const ALLOCATE_ALL: &str = "DPU_ALLOCATE_ALL";

impl fmt::Display for NrDpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{}", count),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for NrDpus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ALLOCATE_ALL | "all" => Ok(NrDpus::All),
            _ => match s.parse::<usize>() {
                Ok(count) if count >= 1 => Ok(NrDpus::Count(count)),
                _ => Err(Error::InvalidConfig(format!(
                    "nr_dpus must be an integer >= 1 or {}, got '{}'",
                    ALLOCATE_ALL, s
                ))),
            },
        }
    }
}

/// Primitive operations of a DPU runtime.
///
/// Every call blocks until the operation completes. Operations address one
/// DPU at a time; broadcasting and batching are layered on top by
/// `DeviceSet`.
pub trait DpuRuntime {
    /// Number of DPUs that are neither allocated nor disabled.
    fn available(&self) -> usize;

    /// Whether "allocate all" can be honored by this runtime.
    fn supports_allocate_all(&self) -> bool;

    /// Reserves exactly `count` DPUs.
    fn allocate(&mut self, count: usize) -> Result<Vec<DpuId>, Error>;

    /// Returns DPUs to the pool. Releasing a DPU that is not allocated is a
    /// no-op.
    fn release(&mut self, dpus: &[DpuId]);

    /// Installs a program image, resetting the DPU's memory.
    fn load(&mut self, dpu: DpuId, image: &ProgramImage) -> Result<(), Error>;

    /// Size in bytes of a named memory region of the loaded program.
    fn symbol_size(&self, dpu: DpuId, symbol: &str) -> Result<usize, Error>;

    fn copy_to(&mut self, dpu: DpuId, symbol: &str, offset: usize, data: &[u8])
        -> Result<(), Error>;

    fn copy_from(
        &mut self,
        dpu: DpuId,
        symbol: &str,
        offset: usize,
        dest: &mut [u8],
    ) -> Result<(), Error>;

    /// Synchronously executes the loaded program on every DPU of `dpus`,
    /// returning one status per DPU, in order.
    fn launch(&mut self, dpus: &[DpuId]) -> Vec<Result<(), Error>>;

    /// Log written by the program during its last execution.
    fn read_log(&self, dpu: DpuId) -> Result<String, Error>;

    /// Removes a DPU from the pool; later allocations skip it.
    fn disable(&mut self, dpu: DpuId) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpu_id_index_round_trip() {
        let dpu = DpuId::from_index(77, 64);
        assert_eq!(dpu, DpuId::new(1, 1, 5));
        assert_eq!(dpu.index(64), 77);
        assert_eq!(format!("{}", dpu), "1.1.5");
    }

    #[test]
    fn parse_nr_dpus() {
        assert_eq!("4".parse::<NrDpus>(), Ok(NrDpus::Count(4)));
        assert_eq!(ALLOCATE_ALL.parse::<NrDpus>(), Ok(NrDpus::All));
        assert_eq!("all".parse::<NrDpus>(), Ok(NrDpus::All));
        assert!(matches!(
            "0".parse::<NrDpus>(),
            Err(Error::InvalidConfig(_))
        ));
        assert!("four".parse::<NrDpus>().is_err());
    }
}

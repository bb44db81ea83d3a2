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

//! Host <-> DPU copies addressed by symbol name.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{DeviceSet, DpuRuntime, Error};

/// How result regions are brought back to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PullStrategy {
    /// One offset-addressed pull per tasklet record.
    PerTasklet,
    /// One pull of the whole results region per DPU.
    WholeRegion,
    /// One batched transfer covering every DPU of the set.
    Batched,
}

impl Default for PullStrategy {
    fn default() -> Self {
        PullStrategy::PerTasklet
    }
}

impl FromStr for PullStrategy {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PerTasklet" => Ok(PullStrategy::PerTasklet),
            "WholeRegion" => Ok(PullStrategy::WholeRegion),
            "Batched" => Ok(PullStrategy::Batched),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid pull strategy: {}", s),
            )),
        }
    }
}

/// Host buffer filled by `DeviceSet::pull_batch`: one `length`-byte slot per
/// DPU of the set, plus the status of each DPU's copy.
pub struct TransferBatch {
    length: usize,
    buffer: Vec<u8>,
    status: Vec<Option<Result<(), Error>>>,
}

impl TransferBatch {
    /// The bytes pulled from the DPU at `index`, or why there are none.
    pub fn get(&self, index: usize) -> Result<&[u8], Error> {
        match self.status.get(index) {
            Some(Some(Ok(()))) => Ok(&self.buffer[index * self.length..(index + 1) * self.length]),
            Some(Some(Err(e))) => Err(e.clone()),
            _ => Err(Error::InvalidConfig(format!(
                "DPU index {} was not part of the batch",
                index
            ))),
        }
    }
}

impl<R: DpuRuntime + ?Sized> DeviceSet<'_, R> {
    pub fn symbol_size(&self, index: usize, symbol: &str) -> Result<usize, Error> {
        let dpu = self.dpu(index)?;
        self.runtime_ref().symbol_size(dpu, symbol)
    }

    /// Copies `data` into `symbol` at `offset` on the DPU at `index`.
    pub fn push_to(
        &mut self,
        index: usize,
        symbol: &str,
        offset: usize,
        data: &[u8],
    ) -> Result<(), Error> {
        let dpu = self.dpu(index)?;
        log::trace!("push {} bytes to {}+{} on DPU {}", data.len(), symbol, offset, dpu);
        self.runtime().copy_to(dpu, symbol, offset, data)
    }

    /// Broadcasts `data` to every DPU of the set. Returns one status per DPU;
    /// a failed copy does not stop the copies to the remaining DPUs.
    pub fn push(&mut self, symbol: &str, offset: usize, data: &[u8]) -> Vec<Result<(), Error>> {
        (0..self.len())
            .map(|index| self.push_to(index, symbol, offset, data))
            .collect()
    }

    /// Copies `dest.len()` bytes of `symbol`, starting at `offset`, from the
    /// DPU at `index`.
    pub fn pull(
        &mut self,
        index: usize,
        symbol: &str,
        offset: usize,
        dest: &mut [u8],
    ) -> Result<(), Error> {
        let dpu = self.dpu(index)?;
        log::trace!("pull {} bytes from {}+{} on DPU {}", dest.len(), symbol, offset, dpu);
        self.runtime().copy_from(dpu, symbol, offset, dest)
    }

    /// Pulls `length` bytes of `symbol` from each DPU of `indices` into one
    /// host buffer.
    pub fn pull_batch(
        &mut self,
        indices: &[usize],
        symbol: &str,
        offset: usize,
        length: usize,
    ) -> TransferBatch {
        let mut buffer = vec![0u8; self.len() * length];
        let mut status = vec![None; self.len()];
        // prepare one destination per DPU, then copy them all
        let mut slots = buffer.chunks_mut(length.max(1)).collect::<Vec<_>>();
        for index in indices {
            let result = match slots.get_mut(*index) {
                Some(slot) => self.pull(*index, symbol, offset, &mut slot[..length]),
                None => Err(Error::InvalidConfig(format!(
                    "DPU index {} out of range for a set of {}",
                    index,
                    self.len()
                ))),
            };
            if let Some(entry) = status.get_mut(*index) {
                *entry = Some(result);
            }
        }
        TransferBatch {
            length,
            buffer,
            status,
        }
    }
}

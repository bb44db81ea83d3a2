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

//! Per-DPU reduction of tasklet result records.
//!
//! Each tasklet leaves one fixed-width record in the results region:
//!
//!```text
//!  offset  tasklet_id * 8      +4
//!          +-------------------+-------------------+
//!          | checksum (u32 LE) | cycles (u32 LE)   |
//!          +-------------------+-------------------+
//!```
//!
//! A DPU's checksum is the (wrapping) sum over its tasklets; its execution
//! time is the slowest tasklet's cycle count.

use crate::{DeviceSet, DpuId, DpuRuntime, Error, PullStrategy, DPU_RESULTS};

/// Size of one tasklet record, in bytes.
pub const RECORD_SIZE: usize = 8;

/// The record produced by a single tasklet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartialResult {
    pub checksum: u32,
    pub cycles: u32,
}

impl PartialResult {
    pub fn new(checksum: u32, cycles: u32) -> Self {
        Self { checksum, cycles }
    }

    pub fn from_le_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        Self {
            checksum: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            cycles: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_le_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..4].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[4..].copy_from_slice(&self.cycles.to_le_bytes());
        bytes
    }
}

/// The per-DPU summary of its tasklet records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReducedResult {
    pub checksum: u32,
    pub cycles: u32,
}

/// Size in bytes of a results region holding `nr_tasklets` records.
pub fn region_size(nr_tasklets: usize) -> Result<usize, Error> {
    nr_tasklets
        .checked_mul(RECORD_SIZE)
        .ok_or_else(|| Error::Protocol {
            dpu: None,
            reason: format!("{} tasklet records overflow the address space", nr_tasklets),
        })
}

/// Decodes a region holding exactly `nr_tasklets` records.
pub fn decode_records(bytes: &[u8], nr_tasklets: usize) -> Result<Vec<PartialResult>, Error> {
    let expected = region_size(nr_tasklets)?;
    if bytes.len() != expected {
        return Err(Error::Protocol {
            dpu: None,
            reason: format!(
                "expected {} records ({} bytes), got {} bytes",
                nr_tasklets,
                expected,
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut record = [0u8; RECORD_SIZE];
            record.copy_from_slice(chunk);
            PartialResult::from_le_bytes(record)
        })
        .collect())
}

/// Sums checksums and takes the maximum cycle count over exactly
/// `nr_tasklets` records. Record order does not matter.
pub fn reduce(records: &[PartialResult], nr_tasklets: usize) -> Result<ReducedResult, Error> {
    if nr_tasklets == 0 {
        return Err(Error::InvalidConfig(
            "nr_tasklets must be at least 1".to_string(),
        ));
    }
    if records.len() != nr_tasklets {
        return Err(Error::Protocol {
            dpu: None,
            reason: format!(
                "expected {} tasklet records, got {}",
                nr_tasklets,
                records.len()
            ),
        });
    }
    Ok(records
        .iter()
        .fold(ReducedResult::default(), |acc, record| ReducedResult {
            checksum: acc.checksum.wrapping_add(record.checksum),
            cycles: acc.cycles.max(record.cycles),
        }))
}

fn attribute(error: Error, dpu: DpuId) -> Error {
    match error {
        Error::Protocol { dpu: None, reason } => Error::Protocol {
            dpu: Some(dpu),
            reason,
        },
        other => other,
    }
}

/// Verifies the loaded program's results region holds one record per
/// tasklet before any record is pulled.
fn check_result_region<R: DpuRuntime + ?Sized>(
    set: &DeviceSet<R>,
    index: usize,
    nr_tasklets: usize,
) -> Result<(), Error> {
    let dpu = set.dpu(index)?;
    let expected = region_size(nr_tasklets).map_err(|e| attribute(e, dpu))?;
    let size = set.symbol_size(index, DPU_RESULTS)?;
    if size != expected {
        return Err(Error::Protocol {
            dpu: Some(dpu),
            reason: format!(
                "{} tasklets expected, the results region holds {} bytes ({} records of {} bytes)",
                nr_tasklets,
                size,
                size as f64 / RECORD_SIZE as f64,
                RECORD_SIZE
            ),
        });
    }
    Ok(())
}

/// Pulls the tasklet records of the DPUs at `indices`, returning one entry
/// per index, in order. A failure on one DPU does not affect the others.
pub fn fetch_records<R: DpuRuntime + ?Sized>(
    set: &mut DeviceSet<R>,
    indices: &[usize],
    nr_tasklets: usize,
    strategy: PullStrategy,
) -> Vec<Result<Vec<PartialResult>, Error>> {
    let checked = indices
        .iter()
        .map(|index| check_result_region(set, *index, nr_tasklets))
        .collect::<Vec<_>>();
    // an overflowing record count already failed every region check
    let length = region_size(nr_tasklets).unwrap_or(0);
    match strategy {
        PullStrategy::PerTasklet => indices
            .iter()
            .zip(checked)
            .map(|(index, checked)| {
                checked?;
                (0..nr_tasklets)
                    .map(|tasklet| {
                        let mut record = [0u8; RECORD_SIZE];
                        set.pull(*index, DPU_RESULTS, tasklet * RECORD_SIZE, &mut record)?;
                        Ok(PartialResult::from_le_bytes(record))
                    })
                    .collect::<Result<Vec<_>, Error>>()
            })
            .collect(),
        PullStrategy::WholeRegion => indices
            .iter()
            .zip(checked)
            .map(|(index, checked)| {
                checked?;
                let mut region = vec![0u8; length];
                set.pull(*index, DPU_RESULTS, 0, &mut region)?;
                decode_records(&region, nr_tasklets).map_err(|e| attribute(e, set.dpus()[*index]))
            })
            .collect(),
        PullStrategy::Batched => {
            // only DPUs with a well-formed region take part in the batch
            let eligible = indices
                .iter()
                .zip(checked.iter())
                .filter(|(_, checked)| checked.is_ok())
                .map(|(index, _)| *index)
                .collect::<Vec<_>>();
            let batch = set.pull_batch(&eligible, DPU_RESULTS, 0, length);
            indices
                .iter()
                .zip(checked)
                .map(|(index, checked)| {
                    checked?;
                    let region = batch.get(*index)?;
                    decode_records(region, nr_tasklets)
                        .map_err(|e| attribute(e, set.dpus()[*index]))
                })
                .collect()
        }
    }
}

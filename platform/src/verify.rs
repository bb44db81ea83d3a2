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

//! Verification of reduced results against the host reference, and the
//! per-DPU run report.

use itertools::Itertools;
use std::fmt;

use crate::reduce::ReducedResult;
use crate::{Checksum, DpuId, Error};

/// Exit status of a run where a DPU failed verification (sysexits.h).
pub const EX_SOFTWARE: i32 = 70;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DpuStatus {
    Match,
    Mismatch,
    /// The DPU never produced a result we could verify.
    Failed(Error),
}

/// Verification outcome of one DPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DpuReport {
    pub index: usize,
    pub dpu: DpuId,
    pub reduced: Option<ReducedResult>,
    pub status: DpuStatus,
}

impl DpuReport {
    pub fn passed(&self) -> bool {
        self.status == DpuStatus::Match
    }

    /// Cycles spent per input byte.
    pub fn throughput(&self, buffer_size: usize) -> Option<f64> {
        match (&self.reduced, buffer_size) {
            (Some(reduced), size) if size > 0 => Some(reduced.cycles as f64 / size as f64),
            _ => None,
        }
    }
}

/// Reports of every DPU in a device set, in allocation order.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub buffer_size: usize,
    pub reference: Checksum,
    pub entries: Vec<DpuReport>,
}

impl RunReport {
    /// True iff every DPU matched. An empty report is not a success.
    pub fn success(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(DpuReport::passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            EX_SOFTWARE
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &DpuReport> {
        self.entries.iter().filter(|e| !e.passed())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "DPU {} ({}):", entry.index, entry.dpu)?;
            if let Some(reduced) = &entry.reduced {
                writeln!(f, "DPU execution time  = {} cc", reduced.cycles)?;
                if let Some(perf) = entry.throughput(self.buffer_size) {
                    writeln!(f, "performance         = {} cc/byte", perf)?;
                }
                writeln!(
                    f,
                    "checksum computed by the DPU = 0x{:08x}",
                    reduced.checksum
                )?;
                writeln!(f, "actual checksum value        = {}", self.reference)?;
            }
            match &entry.status {
                DpuStatus::Match => writeln!(f, "[OK] checksums are equal")?,
                DpuStatus::Mismatch => writeln!(f, "[ERROR] checksums differ!")?,
                DpuStatus::Failed(e) => writeln!(f, "[ERROR] {}", e)?,
            }
        }
        let failed = self.failed().map(|e| e.index).collect::<Vec<_>>();
        if failed.is_empty() {
            write!(f, "{} DPU(s) verified", self.entries.len())
        } else {
            write!(
                f,
                "{} of {} DPU(s) failed: {}",
                failed.len(),
                self.entries.len(),
                failed.iter().format(", ")
            )
        }
    }
}

/// Compares the reduced result of every DPU against `reference`.
///
/// Entries are independent: a mismatch or an error on one DPU never changes
/// the status of another. If `reference` does not fit the device's 32-bit
/// accumulator nothing can match, and every entry carries the overflow.
pub fn verify(
    entries: Vec<(usize, DpuId, Result<ReducedResult, Error>)>,
    reference: Checksum,
    buffer_size: usize,
) -> RunReport {
    let expected = reference.to_device_width();
    let entries = entries
        .into_iter()
        .map(|(index, dpu, reduced)| {
            let (reduced, status) = match (reduced, &expected) {
                (Err(e), _) => (None, DpuStatus::Failed(e)),
                (Ok(reduced), Err(e)) => (Some(reduced), DpuStatus::Failed(e.clone())),
                (Ok(reduced), Ok(expected)) if reduced.checksum == *expected => {
                    (Some(reduced), DpuStatus::Match)
                }
                (Ok(reduced), Ok(expected)) => {
                    log::warn!(
                        "DPU {} ({}): checksum 0x{:08x}, expected 0x{:08x}",
                        index,
                        dpu,
                        reduced.checksum,
                        expected
                    );
                    (Some(reduced), DpuStatus::Mismatch)
                }
            };
            DpuReport {
                index,
                dpu,
                reduced,
                status,
            }
        })
        .collect();
    RunReport {
        buffer_size,
        reference,
        entries,
    }
}
